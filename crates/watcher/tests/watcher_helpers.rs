#![allow(dead_code)]

// Scripted in-memory collaborators for driving a ChainWatcher without a node.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use valwatch_notifier::{Notification, Notifier};
use valwatch_types::{
    Attribute, Block, ConsensusAddress, LogEvent, MessageLog, TxLogs, ValidatorRecord,
};
use valwatch_watcher::{
    forward_block, BlockSource, ChainConfig, ChainQuery, Collaborators, EndpointProbe,
    NodeStatus, NotificationConfig, Timings, TokenConfig, WatcherError,
};

pub const VALOPER: &str = "cosmosvaloper1tracked";
pub const VALIDATOR: ConsensusAddress = [9u8; 20];
pub const OTHER: ConsensusAddress = [1u8; 20];

pub fn chain_config(endpoints: &[&str]) -> ChainConfig {
    ChainConfig {
        name: "hub".to_string(),
        validator_address: VALOPER.to_string(),
        endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        token: TokenConfig {
            label: "ATOM".to_string(),
            coefficient: 0,
        },
        notification: NotificationConfig {
            minimum_delegation: 4.0,
        },
    }
}

pub fn fast_timings() -> Timings {
    Timings {
        endpoint_backoff: Duration::from_millis(10),
        watchdog_poll: Duration::from_millis(50),
        stale_block_after: Duration::from_secs(1),
        validator_recheck: Duration::from_secs(3600),
        stream_silence: Duration::from_secs(1),
        block_channel_capacity: 10,
    }
}

pub fn record(jailed: bool, bonded: bool) -> ValidatorRecord {
    ValidatorRecord {
        operator_address: VALOPER.to_string(),
        moniker: "node1".to_string(),
        jailed,
        bonded,
        consensus_address: VALIDATOR,
    }
}

pub fn block(height: u64, signed: bool) -> Block {
    let signer = if signed { VALIDATOR } else { OTHER };
    Block {
        height,
        signatures: vec![OTHER, signer],
        logs: vec![],
    }
}

pub fn staking_block(height: u64, kind: &str, attributes: &[(&str, &str)]) -> Block {
    let mut block = block(height, true);
    block.logs = vec![TxLogs(vec![MessageLog {
        events: vec![LogEvent {
            kind: kind.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| Attribute::new(*k, *v))
                .collect(),
        }],
        ..Default::default()
    }])];
    block
}

type ProbeFn = dyn Fn(usize, &str) -> Result<NodeStatus, WatcherError> + Send + Sync;

/// Answers each probe from a closure of (call index, endpoint).
pub struct ScriptedProbe {
    calls: AtomicUsize,
    reply: Box<ProbeFn>,
}

impl ScriptedProbe {
    pub fn new(
        reply: impl Fn(usize, &str) -> Result<NodeStatus, WatcherError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: Box::new(reply),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn synced() -> Result<NodeStatus, WatcherError> {
    Ok(NodeStatus {
        network: "testnet".to_string(),
        latest_block_height: 100,
        catching_up: false,
    })
}

pub fn down() -> Result<NodeStatus, WatcherError> {
    Err(WatcherError::Transport("connection refused".to_string()))
}

#[async_trait]
impl EndpointProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &str) -> Result<NodeStatus, WatcherError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(call, endpoint)
    }
}

/// Returns scripted records in order, repeating the last one.
pub struct ScriptedQuery {
    replies: Mutex<VecDeque<Result<ValidatorRecord, WatcherError>>>,
    last: Mutex<Option<ValidatorRecord>>,
    calls: AtomicUsize,
}

impl ScriptedQuery {
    pub fn new(replies: Vec<Result<ValidatorRecord, WatcherError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(vec![Ok(record(false, true))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainQuery for ScriptedQuery {
    async fn query_validator(
        &self,
        _endpoint: &str,
        operator_address: &str,
    ) -> Result<ValidatorRecord, WatcherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(record)) => {
                *self.last.lock().unwrap() = Some(record.clone());
                Ok(record)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| WatcherError::ValidatorNotFound(operator_address.to_string())),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Close,
    HoldOpen,
}

/// Serves one scripted block list per connection.
pub struct ScriptedSource {
    connections: Mutex<VecDeque<(Vec<Block>, Ending)>>,
    endpoints: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(connections: Vec<(Vec<Block>, Ending)>) -> Self {
        Self {
            connections: Mutex::new(connections.into()),
            endpoints: Mutex::new(Vec::new()),
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlockSource for ScriptedSource {
    async fn stream(
        &self,
        endpoint: &str,
        sink: mpsc::Sender<Block>,
        cancel: CancellationToken,
    ) -> Result<(), WatcherError> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        let script = self.connections.lock().unwrap().pop_front();
        let (blocks, ending) = script.unwrap_or((Vec::new(), Ending::Close));

        for block in blocks {
            if !forward_block(&sink, block, &cancel).await {
                return Ok(());
            }
        }

        if ending == Ending::HoldOpen {
            cancel.cancelled().await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.sent.lock().unwrap().len() < count {
            if tokio::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

pub struct Harness {
    pub probe: Arc<ScriptedProbe>,
    pub query: Arc<ScriptedQuery>,
    pub source: Arc<ScriptedSource>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(probe: ScriptedProbe, query: ScriptedQuery, source: ScriptedSource) -> Self {
        Self {
            probe: Arc::new(probe),
            query: Arc::new(query),
            source: Arc::new(source),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            probe: self.probe.clone(),
            query: self.query.clone(),
            source: self.source.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
