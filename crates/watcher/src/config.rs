use crate::error::WatcherError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use valwatch_types::{stream, timing, token};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub validator_address: String,
    #[serde(rename = "rpc")]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub label: String,
    /// Smallest-unit divisor. Zero means unset.
    #[serde(default)]
    pub coefficient: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub minimum_delegation: f64,
}

impl ChainConfig {
    pub fn token_coefficient(&self) -> u64 {
        if self.token.coefficient == 0 {
            token::DEFAULT_COEFFICIENT
        } else {
            self.token.coefficient
        }
    }

    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.name.trim().is_empty() {
            return Err(WatcherError::Config("chain name is empty".to_string()));
        }
        if self.validator_address.trim().is_empty() {
            return Err(WatcherError::Config(format!(
                "chain {} has no validator_address",
                self.name
            )));
        }
        if self.endpoints.is_empty() {
            return Err(WatcherError::Config(format!(
                "chain {} has no rpc endpoints",
                self.name
            )));
        }
        let minimum = self.notification.minimum_delegation;
        if minimum.is_nan() || minimum < 0.0 {
            return Err(WatcherError::Config(format!(
                "chain {} has an invalid minimum_delegation",
                self.name
            )));
        }
        Ok(())
    }
}

/// Fixed intervals of the watch loop.
#[derive(Debug, Clone)]
pub struct Timings {
    pub endpoint_backoff: Duration,
    pub watchdog_poll: Duration,
    pub stale_block_after: Duration,
    pub validator_recheck: Duration,
    pub stream_silence: Duration,
    pub block_channel_capacity: usize,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            endpoint_backoff: Duration::from_secs(timing::ENDPOINT_BACKOFF_SECONDS),
            watchdog_poll: Duration::from_secs(timing::WATCHDOG_POLL_SECONDS),
            stale_block_after: Duration::from_secs(timing::STALE_BLOCK_SECONDS),
            validator_recheck: Duration::from_secs(timing::VALIDATOR_RECHECK_SECONDS),
            stream_silence: Duration::from_secs(timing::STREAM_SILENCE_SECONDS),
            block_channel_capacity: stream::BLOCK_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatcherConfig {
    pub chains: Vec<ChainConfig>,
    pub timings: Timings,
}

impl WatcherConfig {
    pub fn new(chains: Vec<ChainConfig>) -> Self {
        Self {
            chains,
            timings: Timings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.chains.is_empty() {
            return Err(WatcherError::Config("no chains configured".to_string()));
        }
        for chain in &self.chains {
            chain.validate()?;
        }
        Ok(())
    }
}
