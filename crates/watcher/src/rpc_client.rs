use crate::error::WatcherError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RpcClientConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            url: http_url(endpoint),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            max_retries: 0,
            retry_delay: Duration::from_millis(250),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub network: String,
    pub latest_block_height: u64,
    pub catching_up: bool,
}

/// Tendermint JSON-RPC over HTTP.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcClientConfig,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, WatcherError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, WatcherError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_delay * attempt;
                warn!(
                    "RPC call {} failed, retrying in {}ms (attempt {}/{}): {}",
                    method,
                    delay.as_millis(),
                    attempt,
                    self.config.max_retries,
                    last_error
                        .as_ref()
                        .map(|e: &WatcherError| e.to_string())
                        .unwrap_or_default()
                );
                sleep(delay).await;
            }

            match self.try_call(&payload).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("RPC call {} succeeded after {} retries", method, attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt == self.config.max_retries && attempt > 0 {
                        error!("RPC call {} failed after {} retries", method, attempt);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WatcherError::Transport("RPC call failed".to_string())))
    }

    async fn try_call(&self, payload: &Value) -> Result<Value, WatcherError> {
        let response: Value = self
            .client
            .post(&self.config.url)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("data")
                .or_else(|| error.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown RPC error")
                .to_string();
            let code = error.get("code").and_then(|v| v.as_i64()).unwrap_or(-1);

            return Err(WatcherError::Rpc { code, message });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| WatcherError::Decode("missing result".to_string()))
    }

    pub async fn status(&self) -> Result<NodeStatus, WatcherError> {
        let result = self.call("status", serde_json::json!({})).await?;
        parse_status(&result)
    }

    /// Returns `None` when the query succeeded but carried no value.
    pub async fn abci_query(&self, path: &str, data: &[u8]) -> Result<Option<Vec<u8>>, WatcherError> {
        let params = serde_json::json!({
            "path": path,
            "data": hex::encode(data),
            "height": "0",
            "prove": false
        });

        let result = self.call("abci_query", params).await?;
        parse_abci_query(&result)
    }

    /// Raw ABCI log of a committed transaction.
    pub async fn tx(&self, hash: &[u8]) -> Result<String, WatcherError> {
        let params = serde_json::json!({
            "hash": BASE64.encode(hash),
            "prove": false
        });

        let result = self.call("tx", params).await?;

        result
            .pointer("/tx_result/log")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| WatcherError::Decode("missing tx_result.log".to_string()))
    }
}

fn parse_status(result: &Value) -> Result<NodeStatus, WatcherError> {
    let sync_info = result
        .get("sync_info")
        .ok_or_else(|| WatcherError::Decode("missing sync_info".to_string()))?;

    let catching_up = sync_info
        .get("catching_up")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| WatcherError::Decode("missing sync_info.catching_up".to_string()))?;

    let latest_block_height = sync_info
        .get("latest_block_height")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    let network = result
        .pointer("/node_info/network")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(NodeStatus {
        network,
        latest_block_height,
        catching_up,
    })
}

fn parse_abci_query(result: &Value) -> Result<Option<Vec<u8>>, WatcherError> {
    let response = result
        .get("response")
        .ok_or_else(|| WatcherError::Decode("missing abci response".to_string()))?;

    let code = response.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
    if code != 0 {
        let message = response
            .get("log")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        return Err(WatcherError::Rpc { code, message });
    }

    match response.get("value").and_then(|v| v.as_str()) {
        None | Some("") => Ok(None),
        Some(value) => BASE64
            .decode(value)
            .map(Some)
            .map_err(|e| WatcherError::Decode(format!("abci value: {}", e))),
    }
}

/// Normalizes a configured endpoint into an HTTP base URL.
pub fn http_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if let Some(rest) = endpoint.strip_prefix("tcp://") {
        format!("http://{}", rest)
    } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

pub fn websocket_url(endpoint: &str) -> String {
    let base = http_url(endpoint);
    let base = match base.strip_prefix("https://") {
        Some(rest) => format!("wss://{}", rest),
        None => format!("ws://{}", base.trim_start_matches("http://")),
    };
    format!("{}/websocket", base)
}
