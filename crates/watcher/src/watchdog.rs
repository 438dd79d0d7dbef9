use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Time of the last received block. Written by the consumer, read by the watchdog.
#[derive(Debug)]
pub struct BlockClock {
    origin: Instant,
    last_millis: AtomicU64,
}

impl BlockClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_millis.store(now, Ordering::Release);
    }

    pub fn since_last_block(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Acquire));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for BlockClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs while the block stream is stale. Returns the number of stale polls.
pub async fn run_watchdog(
    clock: Arc<BlockClock>,
    poll: Duration,
    stale_after: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut stale_polls = 0;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + poll, poll);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return stale_polls,
            _ = ticker.tick() => {
                let silence = clock.since_last_block();
                if silence > stale_after {
                    stale_polls += 1;
                    error!(silence_secs = silence.as_secs(), "No block received since {}s", stale_after.as_secs());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_resets_silence() {
        let clock = BlockClock::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.since_last_block() >= Duration::from_millis(20));

        clock.touch();
        assert!(clock.since_last_block() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_watchdog_reports_stale_stream_and_stops_on_cancel() {
        let clock = Arc::new(BlockClock::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watchdog(
            clock,
            Duration::from_millis(10),
            Duration::from_millis(5),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();

        let stale_polls = handle.await.unwrap();
        assert!(stale_polls >= 1);
    }

    #[tokio::test]
    async fn test_watchdog_quiet_while_blocks_arrive() {
        let clock = Arc::new(BlockClock::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watchdog(
            clock.clone(),
            Duration::from_millis(10),
            Duration::from_secs(5),
            cancel.clone(),
        ));

        for _ in 0..5 {
            clock.touch();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), 0);
    }
}
