use crate::error::WatcherError;
use crate::rpc_client::{NodeStatus, RpcClient, RpcClientConfig};
use async_trait::async_trait;
use tracing::{debug, warn};
use valwatch_types::EndpointStatus;

/// Reports the sync status of a single endpoint.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> Result<NodeStatus, WatcherError>;
}

/// Probes an endpoint with a single Tendermint `status` call.
#[derive(Debug, Default, Clone)]
pub struct RpcEndpointProbe;

#[async_trait]
impl EndpointProbe for RpcEndpointProbe {
    async fn probe(&self, endpoint: &str) -> Result<NodeStatus, WatcherError> {
        RpcClient::new(RpcClientConfig::new(endpoint))?.status().await
    }
}

/// Result of one selection pass, in configured order.
#[derive(Debug, Clone, Default)]
pub struct EndpointStatuses(Vec<EndpointStatus>);

impl EndpointStatuses {
    pub fn new(statuses: Vec<EndpointStatus>) -> Self {
        Self(statuses)
    }

    /// First usable endpoint in list order.
    pub fn first_usable(&self) -> Option<&EndpointStatus> {
        self.0.iter().find(|status| status.is_usable())
    }

    pub fn usable_count(&self) -> usize {
        self.0.iter().filter(|status| status.is_usable()).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointStatus> {
        self.0.iter()
    }
}

/// Probes every endpoint in order. A failing probe never stops the pass.
pub async fn check_endpoints(probe: &dyn EndpointProbe, endpoints: &[String]) -> EndpointStatuses {
    let mut statuses = Vec::with_capacity(endpoints.len());

    for endpoint in endpoints {
        let status = match probe.probe(endpoint).await {
            Ok(node) => {
                if node.catching_up {
                    warn!(endpoint = %endpoint, height = node.latest_block_height, "Endpoint is catching up");
                } else {
                    debug!(endpoint = %endpoint, height = node.latest_block_height, "Endpoint is synced");
                }
                EndpointStatus::reachable(endpoint.clone(), node.catching_up)
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Endpoint is unreachable");
                EndpointStatus::unreachable(endpoint.clone(), e)
            }
        };
        statuses.push(status);
    }

    EndpointStatuses::new(statuses)
}
