mod constants;

pub use constants::*;

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Height = u64;

pub type ConsensusAddress = [u8; constants::address::CONSENSUS_ADDRESS_SIZE];

/// Hex form used by Tendermint for commit signature addresses.
pub fn consensus_address_hex(address: &ConsensusAddress) -> String {
    hex::encode_upper(address)
}

pub fn parse_consensus_address(value: &str) -> Option<ConsensusAddress> {
    let bytes = hex::decode(value).ok()?;
    bytes.try_into().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorRecord {
    pub operator_address: String,
    pub moniker: String,
    pub jailed: bool,
    pub bonded: bool,
    pub consensus_address: ConsensusAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub url: String,
    pub catching_up: bool,
    pub error: Option<String>,
}

impl EndpointStatus {
    pub fn reachable(url: impl Into<String>, catching_up: bool) -> Self {
        Self {
            url: url.into(),
            catching_up,
            error: None,
        }
    }

    pub fn unreachable(url: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            url: url.into(),
            catching_up: false,
            error: Some(error.to_string()),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.error.is_none() && !self.catching_up
    }
}

/// A decoded block as it flows through the pipeline. Not retained after processing.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub height: Height,
    pub signatures: Vec<ConsensusAddress>,
    pub logs: Vec<TxLogs>,
}

impl Block {
    pub fn is_signed_by(&self, address: &ConsensusAddress) -> bool {
        self.signatures.iter().any(|sig| sig == address)
    }

    pub fn events(&self) -> impl Iterator<Item = &LogEvent> {
        self.logs
            .iter()
            .flat_map(|tx| tx.0.iter())
            .flat_map(|log| log.events.iter())
    }
}

/// ABCI message logs of one transaction, as returned in `tx_result.log`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxLogs(pub Vec<MessageLog>);

impl TxLogs {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    #[serde(default)]
    pub msg_index: u32,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub events: Vec<LogEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
