use crate::block_source::{BlockSource, TendermintBlockSource};
use crate::config::{ChainConfig, Timings};
use crate::delegation::{DelegationExtractor, StakeChange};
use crate::endpoint::{check_endpoints, EndpointProbe, EndpointStatuses, RpcEndpointProbe};
use crate::error::WatcherError;
use crate::health::{AlertState, Edge, HealthEvent, HealthTracker};
use crate::query::{ChainQuery, RpcChainQuery};
use crate::watchdog::{run_watchdog, BlockClock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use valwatch_notifier::Notifier;
use valwatch_types::{consensus_address_hex, Block};

/// External services a chain watcher drives.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn EndpointProbe>,
    pub query: Arc<dyn ChainQuery>,
    pub source: Arc<dyn BlockSource>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    pub fn tendermint(timings: &Timings, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            probe: Arc::new(RpcEndpointProbe),
            query: Arc::new(RpcChainQuery),
            source: Arc::new(TendermintBlockSource::new(timings.stream_silence)),
            notifier,
        }
    }
}

/// Watches one chain for the process lifetime, failing over between endpoints.
pub struct ChainWatcher {
    config: ChainConfig,
    timings: Timings,
    collaborators: Collaborators,
    shutdown: CancellationToken,
}

impl ChainWatcher {
    pub fn new(
        config: ChainConfig,
        timings: Timings,
        collaborators: Collaborators,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            timings,
            collaborators,
            shutdown,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn watch(&self) {
        let span = info_span!("chain", chain = %self.config.name);
        self.run().instrument(span).await
    }

    async fn run(&self) {
        info!(
            endpoints = self.config.endpoints.len(),
            validator = %self.config.validator_address,
            "Starting chain watcher"
        );

        let mut availability = AlertState::Healthy;

        while !self.shutdown.is_cancelled() {
            let statuses = self.select_endpoint().await;

            let Some(endpoint) = statuses.first_usable().map(|s| s.url.clone()) else {
                if availability.update(true) == Some(Edge::Raised) {
                    self.collaborators
                        .notifier
                        .alert(format!(
                            "[{}] No valid RPC (0/{})",
                            self.config.name,
                            statuses.len()
                        ))
                        .await;
                }
                warn!(probed = statuses.len(), "No usable endpoint");
                if !self.pause().await {
                    break;
                }
                continue;
            };

            if availability.update(false) == Some(Edge::Cleared) {
                self.collaborators
                    .notifier
                    .recover(format!("[{}] RPCs are back up", self.config.name))
                    .await;
            }

            let span = info_span!("connection", endpoint = %endpoint);
            match self.connect(&endpoint).instrument(span).await {
                Ok(()) => info!(endpoint = %endpoint, "Block stream ended, selecting endpoint again"),
                Err(WatcherError::NoBlocksReceived) => {
                    error!(endpoint = %endpoint, "Connection ended without any block");
                    if !self.pause().await {
                        break;
                    }
                }
                Err(e) => {
                    error!(endpoint = %endpoint, error = %e, "Connection failed");
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }

        info!("Chain watcher stopped");
    }

    pub async fn select_endpoint(&self) -> EndpointStatuses {
        check_endpoints(self.collaborators.probe.as_ref(), &self.config.endpoints).await
    }

    /// Sleeps for the endpoint backoff. Returns `false` if shutdown interrupted it.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.timings.endpoint_backoff) => true,
        }
    }

    /// Runs one connection against `endpoint` with fresh watcher state.
    ///
    /// Returns `Ok` when the stream ended after delivering blocks and
    /// `NoBlocksReceived` when it ended without any.
    pub async fn connect(&self, endpoint: &str) -> Result<(), WatcherError> {
        let cancel = self.shutdown.child_token();
        let _guard = cancel.clone().drop_guard();

        let record = self
            .collaborators
            .query
            .query_validator(endpoint, &self.config.validator_address)
            .await?;

        info!(
            moniker = %record.moniker,
            consensus_address = %consensus_address_hex(&record.consensus_address),
            jailed = record.jailed,
            bonded = record.bonded,
            "Validator loaded"
        );

        let mut moniker = record.moniker.clone();
        let mut tracker = HealthTracker::new(record.consensus_address);
        let events = tracker.observe_record(&record);
        self.report_health(&moniker, events).await;

        let extractor = DelegationExtractor::from_config(&self.config);

        let clock = Arc::new(BlockClock::new());
        let watchdog = tokio::spawn(
            run_watchdog(
                clock.clone(),
                self.timings.watchdog_poll,
                self.timings.stale_block_after,
                cancel.clone(),
            )
            .in_current_span(),
        );

        let (sink, mut blocks) = mpsc::channel(self.timings.block_channel_capacity);
        let source = self.collaborators.source.clone();
        let source_endpoint = endpoint.to_string();
        let source_cancel = cancel.clone();
        let producer = tokio::spawn(
            async move { source.stream(&source_endpoint, sink, source_cancel).await }
                .in_current_span(),
        );

        let recheck_every = self.timings.validator_recheck;
        let mut recheck =
            tokio::time::interval_at(tokio::time::Instant::now() + recheck_every, recheck_every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                block = blocks.recv() => match block {
                    Some(block) => {
                        clock.touch();
                        self.process_block(&mut tracker, &extractor, &moniker, &block).await;
                    }
                    None => break,
                },
                _ = recheck.tick() => {
                    match self
                        .collaborators
                        .query
                        .query_validator(endpoint, &self.config.validator_address)
                        .await
                    {
                        Ok(record) => {
                            moniker = record.moniker.clone();
                            let events = tracker.observe_record(&record);
                            self.report_health(&moniker, events).await;
                        }
                        Err(e) => warn!(error = %e, "Validator re-check failed"),
                    }
                }
            }
        }

        cancel.cancel();

        if let Err(e) = watchdog.await {
            error!(error = %e, "Watchdog task failed");
        }

        match producer.await {
            Ok(Ok(())) => debug!("Block source finished"),
            Ok(Err(e)) => warn!(error = %e, "Block source terminated"),
            Err(e) => error!(error = %e, "Block source task failed"),
        }

        if tracker.last_height() == 0 {
            return Err(WatcherError::NoBlocksReceived);
        }

        info!(last_height = tracker.last_height(), "Connection closed");
        Ok(())
    }

    async fn process_block(
        &self,
        tracker: &mut HealthTracker,
        extractor: &DelegationExtractor,
        moniker: &str,
        block: &Block,
    ) {
        let report = tracker.observe_block(block);

        if let Some(gap) = report.gap {
            error!(from = gap.from, to = gap.to, "Missed block from {} to {}", gap.from, gap.to);
        }

        if report.signed == Some(false) {
            warn!(
                height = block.height,
                missed = tracker.missed_blocks(),
                "Validator didn't sign block"
            );
        }

        if let Some(event) = report.event {
            self.report_health(moniker, vec![event]).await;
        }

        let notifier = &self.collaborators.notifier;
        let token = &self.config.token.label;
        for change in extractor.extract(block) {
            match change {
                StakeChange::Delegation(amount) => {
                    info!(height = block.height, amount, token = %token, "New delegation");
                    notifier.delegation(amount, token.clone()).await;
                }
                StakeChange::Undelegation(amount) => {
                    info!(height = block.height, amount, token = %token, "Lost delegation");
                    notifier.undelegation(amount, token.clone()).await;
                }
            }
        }
    }

    async fn report_health(&self, moniker: &str, events: Vec<HealthEvent>) {
        for event in events {
            let message = event.message(&self.config.name, moniker);
            if event.is_alert() {
                warn!(event = ?event, "{}", message);
                self.collaborators.notifier.alert(message).await;
            } else {
                info!(event = ?event, "{}", message);
                self.collaborators.notifier.recover(message).await;
            }
        }
    }
}
