mod block_source;
mod chain_watcher;
mod config;
mod delegation;
mod endpoint;
mod error;
mod health;
mod proto;
mod query;
mod rpc_client;
mod watchdog;

pub use block_source::{forward_block, BlockSource, TendermintBlockSource};
pub use chain_watcher::{ChainWatcher, Collaborators};
pub use config::{ChainConfig, NotificationConfig, Timings, TokenConfig, WatcherConfig};
pub use delegation::{
    delegations, group_attributes, undelegations, DelegationExtractor, MsgDelegate, MsgUndelegate,
    StakeChange,
};
pub use endpoint::{check_endpoints, EndpointProbe, EndpointStatuses, RpcEndpointProbe};
pub use error::WatcherError;
pub use health::{AlertState, BlockReport, Edge, HealthEvent, HealthTracker, HeightGap};
pub use query::{decode_validator_response, ChainQuery, RpcChainQuery};
pub use rpc_client::{NodeStatus, RpcClient, RpcClientConfig};
pub use watchdog::{run_watchdog, BlockClock};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use valwatch_notifier::Notifier;

/// Runs one independent [`ChainWatcher`] task per configured chain.
pub struct Watcher {
    config: WatcherConfig,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
}

impl Watcher {
    pub fn new(config: WatcherConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            notifier,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops every chain task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn start(&self) -> Result<(), WatcherError> {
        self.config.validate()?;

        let collaborators = Collaborators::tendermint(&self.config.timings, self.notifier.clone());
        let mut handles = Vec::new();

        for chain_config in &self.config.chains {
            let watcher = ChainWatcher::new(
                chain_config.clone(),
                self.config.timings.clone(),
                collaborators.clone(),
                self.shutdown.clone(),
            );

            let handle = tokio::spawn(async move { watcher.watch().await });
            handles.push((chain_config.name.clone(), handle));
        }

        for (chain, handle) in handles {
            if let Err(e) = handle.await {
                error!(chain = %chain, error = %e, "Chain watcher task failed");
            }
        }

        Ok(())
    }
}
