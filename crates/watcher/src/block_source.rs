use crate::error::WatcherError;
use crate::rpc_client::{websocket_url, RpcClient, RpcClientConfig};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use valwatch_types::{parse_consensus_address, stream, timing, Block, TxLogs};

/// Produces the live block sequence of one endpoint into `sink`.
///
/// Returns when the stream terminates: `Ok` on cancellation, when no block
/// arrived within the silence bound, or when the consumer has gone away; `Err`
/// when the transport fails or closes.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn stream(
        &self,
        endpoint: &str,
        sink: mpsc::Sender<Block>,
        cancel: CancellationToken,
    ) -> Result<(), WatcherError>;
}

/// Pushes a block into the bounded queue. Logs when the queue is full, then
/// waits for room. Returns `false` once the consumer is gone or `cancel` fires.
pub async fn forward_block(
    sink: &mpsc::Sender<Block>,
    block: Block,
    cancel: &CancellationToken,
) -> bool {
    match sink.try_send(block) {
        Ok(()) => true,
        Err(TrySendError::Full(block)) => {
            warn!(
                height = block.height,
                capacity = sink.max_capacity(),
                "Block channel is full"
            );
            tokio::select! {
                _ = cancel.cancelled() => false,
                sent = sink.send(block) => sent.is_ok(),
            }
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(default)]
    result: Option<EventResult>,
}

#[derive(Debug, Deserialize)]
struct EventResult {
    #[serde(default)]
    data: Option<EventData>,
}

#[derive(Debug, Deserialize)]
struct EventData {
    #[serde(rename = "type")]
    kind: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NewBlockValue {
    block: RawBlock,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBlock {
    header: RawHeader,
    #[serde(default)]
    data: RawData,
    #[serde(default)]
    last_commit: Option<RawCommit>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    height: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    #[serde(default)]
    signatures: Vec<RawSignature>,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    #[serde(default)]
    validator_address: Option<String>,
}

const NEW_BLOCK_EVENT: &str = "tendermint/event/NewBlock";

/// Extracts the block from a websocket event. `Ok(None)` for anything that is
/// not a NewBlock event, such as the subscription acknowledgement.
pub(crate) fn decode_new_block(text: &str) -> Result<Option<RawBlock>, WatcherError> {
    let message: EventMessage = serde_json::from_str(text)?;
    let Some(data) = message.result.and_then(|r| r.data) else {
        return Ok(None);
    };
    if data.kind != NEW_BLOCK_EVENT {
        return Ok(None);
    }
    let value: NewBlockValue = serde_json::from_value(data.value)?;
    Ok(Some(value.block))
}

impl RawBlock {
    pub(crate) fn height(&self) -> Result<u64, WatcherError> {
        self.header
            .height
            .parse()
            .map_err(|e| WatcherError::Decode(format!("block height {:?}: {}", self.header.height, e)))
    }

    fn into_parts(self) -> (Vec<valwatch_types::ConsensusAddress>, Vec<String>) {
        let signatures = self
            .last_commit
            .map(|commit| commit.signatures)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|sig| sig.validator_address)
            .filter_map(|address| parse_consensus_address(&address))
            .collect();
        (signatures, self.data.txs.unwrap_or_default())
    }
}

pub(crate) fn tx_hash(encoded_tx: &str) -> Result<[u8; 32], WatcherError> {
    let tx = BASE64
        .decode(encoded_tx)
        .map_err(|e| WatcherError::Decode(format!("tx bytes: {}", e)))?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(tx));
    Ok(hash)
}

pub(crate) fn subscribe_request() -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "subscribe",
        "id": 0,
        "params": { "query": stream::NEW_BLOCK_QUERY }
    })
    .to_string()
}

/// NewBlock subscription over the Tendermint websocket.
pub struct TendermintBlockSource {
    silence: Duration,
}

impl TendermintBlockSource {
    pub fn new(silence: Duration) -> Self {
        Self { silence }
    }

    async fn fetch_logs(&self, rpc: &RpcClient, height: u64, txs: &[String]) -> Vec<TxLogs> {
        let mut logs = Vec::with_capacity(txs.len());

        for encoded in txs {
            let hash = match tx_hash(encoded) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(height, error = %e, "Skipping undecodable tx");
                    continue;
                }
            };

            let raw = match rpc.tx(&hash).await {
                Ok(raw) => raw,
                Err(e) => {
                    error!(height, tx = %hex::encode_upper(hash), error = %e, "Failed to fetch tx");
                    continue;
                }
            };

            match TxLogs::parse(&raw) {
                Ok(parsed) => logs.push(parsed),
                Err(e) => debug!(height, tx = %hex::encode_upper(hash), error = %e, "Tx log is not JSON"),
            }
        }

        logs
    }
}

impl Default for TendermintBlockSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(timing::STREAM_SILENCE_SECONDS))
    }
}

#[async_trait]
impl BlockSource for TendermintBlockSource {
    async fn stream(
        &self,
        endpoint: &str,
        sink: mpsc::Sender<Block>,
        cancel: CancellationToken,
    ) -> Result<(), WatcherError> {
        let rpc = RpcClient::new(
            RpcClientConfig::new(endpoint)
                .with_retries(1, Duration::from_millis(timing::TX_FETCH_RETRY_MILLIS)),
        )?;

        let url = websocket_url(endpoint);
        let (ws, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        write.send(Message::Text(subscribe_request())).await?;
        info!(url = %url, "Start listening blocks");

        // Only a forwarded block pushes the deadline; pings and other frames do not.
        let mut deadline = Instant::now() + self.silence;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => {
                    error!("No block received since {}s", self.silence.as_secs());
                    return Ok(());
                }
                next = read.next() => next,
            };

            let message = match next {
                None => return Err(WatcherError::StreamClosed("websocket ended".to_string())),
                Some(message) => message?,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    return Err(WatcherError::StreamClosed(format!("closed by server: {:?}", frame)))
                }
                _ => continue,
            };

            let raw = match decode_new_block(&text) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Failed to decode event");
                    continue;
                }
            };

            let height = match raw.height() {
                Ok(height) => height,
                Err(e) => {
                    error!(error = %e, "Failed to decode event");
                    continue;
                }
            };

            let (signatures, txs) = raw.into_parts();
            info!(height, txs = txs.len(), "Received block");

            let logs = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(height, "Cancelled while fetching tx logs");
                    return Ok(());
                }
                logs = self.fetch_logs(&rpc, height, &txs) => logs,
            };
            let block = Block {
                height,
                signatures,
                logs,
            };

            if !forward_block(&sink, block, &cancel).await {
                return Ok(());
            }
            deadline = Instant::now() + self.silence;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEW_BLOCK: &str = r#"{
        "jsonrpc": "2.0",
        "id": 0,
        "result": {
            "query": "tm.event='NewBlock'",
            "data": {
                "type": "tendermint/event/NewBlock",
                "value": {
                    "block": {
                        "header": { "height": "12345", "chain_id": "cosmoshub-4" },
                        "data": { "txs": ["aGVsbG8="] },
                        "last_commit": {
                            "height": "12344",
                            "signatures": [
                                { "block_id_flag": 2, "validator_address": "0909090909090909090909090909090909090909" },
                                { "block_id_flag": 1, "validator_address": "" },
                                { "block_id_flag": 2, "validator_address": null }
                            ]
                        }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_decode_new_block() {
        let raw = decode_new_block(NEW_BLOCK).unwrap().unwrap();
        assert_eq!(raw.height().unwrap(), 12345);

        let (signatures, txs) = raw.into_parts();
        assert_eq!(signatures, vec![[9u8; 20]]);
        assert_eq!(txs, vec!["aGVsbG8=".to_string()]);
    }

    #[test]
    fn test_subscription_ack_is_not_a_block() {
        let ack = r#"{"jsonrpc":"2.0","id":0,"result":{}}"#;
        assert!(decode_new_block(ack).unwrap().is_none());
    }

    #[test]
    fn test_null_txs_decode_as_empty() {
        let text = r#"{"result":{"data":{"type":"tendermint/event/NewBlock","value":{"block":{"header":{"height":"7"},"data":{"txs":null},"last_commit":null}}}}}"#;
        let raw = decode_new_block(text).unwrap().unwrap();
        let (signatures, txs) = raw.into_parts();
        assert!(signatures.is_empty());
        assert!(txs.is_empty());
    }

    #[test]
    fn test_tx_hash_is_sha256_of_tx_bytes() {
        let hash = tx_hash("aGVsbG8=").unwrap();
        assert_eq!(
            hex::encode(hash),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_subscribe_request() {
        let request: serde_json::Value = serde_json::from_str(&subscribe_request()).unwrap();
        assert_eq!(request["method"], "subscribe");
        assert_eq!(request["params"]["query"], "tm.event='NewBlock'");
    }

    #[tokio::test]
    async fn test_forward_block_waits_for_room() {
        let (sink, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        assert!(forward_block(&sink, Block { height: 1, ..Default::default() }, &cancel).await);

        let consumer = tokio::spawn(async move {
            let mut heights = Vec::new();
            while let Some(block) = rx.recv().await {
                heights.push(block.height);
            }
            heights
        });

        assert!(forward_block(&sink, Block { height: 2, ..Default::default() }, &cancel).await);
        drop(sink);

        assert_eq!(consumer.await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_forward_block_stops_when_cancelled_while_full() {
        let (sink, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        assert!(forward_block(&sink, Block::default(), &cancel).await);

        cancel.cancel();
        assert!(!forward_block(&sink, Block::default(), &cancel).await);
    }

    #[tokio::test]
    async fn test_forward_block_reports_closed_consumer() {
        let (sink, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!forward_block(&sink, Block::default(), &CancellationToken::new()).await);
    }

    mod node {
        use futures::{SinkExt, StreamExt};
        use std::future::Future;
        use std::time::Duration;
        use tokio::net::{TcpListener, TcpStream};
        use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

        pub type Session = WebSocketStream<TcpStream>;

        /// Serves one websocket session, then accepts and never answers every
        /// further connection, so tx lookups hang. Returns the endpoint URL.
        pub async fn spawn<F, Fut>(session: F) -> String
        where
            F: FnOnce(Session) -> Fut + Send + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            tokio::spawn(async move {
                let (socket, _) = listener.accept().await.unwrap();
                let ws = accept_async(socket).await.unwrap();
                tokio::spawn(session(ws));

                let mut held = Vec::new();
                while let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            });

            format!("http://{}", addr)
        }

        pub async fn drain(ws: &mut Session) {
            while let Some(Ok(_)) = ws.next().await {}
        }

        pub async fn ping_forever(mut ws: Session) {
            loop {
                if ws.send(Message::Ping(vec![1])).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        pub fn new_block(height: u64, txs: &[&str]) -> Message {
            let event = serde_json::json!({
                "jsonrpc": "2.0",
                "id": 0,
                "result": {
                    "data": {
                        "type": "tendermint/event/NewBlock",
                        "value": {
                            "block": {
                                "header": { "height": height.to_string() },
                                "data": { "txs": txs },
                                "last_commit": { "signatures": [] }
                            }
                        }
                    }
                }
            });
            Message::Text(event.to_string())
        }
    }

    async fn run(
        source: TendermintBlockSource,
        endpoint: String,
        cancel: CancellationToken,
    ) -> (
        tokio::task::JoinHandle<Result<(), WatcherError>>,
        mpsc::Receiver<Block>,
    ) {
        let (sink, rx) = mpsc::channel(10);
        let handle = tokio::spawn(async move { source.stream(&endpoint, sink, cancel).await });
        (handle, rx)
    }

    #[tokio::test]
    async fn test_pings_do_not_extend_silence_bound() {
        let endpoint = node::spawn(node::ping_forever).await;
        let source = TendermintBlockSource::new(Duration::from_millis(300));
        let (handle, _rx) = run(source, endpoint, CancellationToken::new()).await;

        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("stream should end after the silence bound")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_blocks_are_forwarded() {
        let endpoint = node::spawn(|mut ws| async move {
            ws.next().await;
            ws.send(node::new_block(7, &[])).await.unwrap();
            ws.send(node::new_block(8, &[])).await.unwrap();
            node::drain(&mut ws).await;
        })
        .await;
        let cancel = CancellationToken::new();
        let source = TendermintBlockSource::new(Duration::from_secs(10));
        let (handle, mut rx) = run(source, endpoint, cancel.clone()).await;

        assert_eq!(rx.recv().await.unwrap().height, 7);
        assert_eq!(rx.recv().await.unwrap().height, 8);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_server_close_ends_stream() {
        let endpoint = node::spawn(|mut ws| async move {
            ws.next().await;
            let _ = ws.close(None).await;
            node::drain(&mut ws).await;
        })
        .await;
        let source = TendermintBlockSource::new(Duration::from_secs(10));
        let (handle, _rx) = run(source, endpoint, CancellationToken::new()).await;

        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(WatcherError::StreamClosed(_))));
    }

    #[tokio::test]
    async fn test_cancel_while_idle() {
        let endpoint = node::spawn(|mut ws| async move { node::drain(&mut ws).await }).await;
        let cancel = CancellationToken::new();
        let source = TendermintBlockSource::new(Duration::from_secs(10));
        let (handle, _rx) = run(source, endpoint, cancel.clone()).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_while_fetching_tx_logs() {
        let endpoint = node::spawn(|mut ws| async move {
            ws.next().await;
            ws.send(node::new_block(5, &["aGVsbG8=", "d29ybGQ=", "Zm9v"]))
                .await
                .unwrap();
            node::drain(&mut ws).await;
        })
        .await;
        let cancel = CancellationToken::new();
        let source = TendermintBlockSource::new(Duration::from_secs(10));
        let (handle, mut rx) = run(source, endpoint, cancel.clone()).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stream should stop while tx lookups hang")
            .unwrap();
        assert!(result.is_ok());
        assert!(rx.try_recv().is_err());
    }
}
