use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Invalid config: {0}")]
    Config(String),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Validator ({0}) not found")]
    ValidatorNotFound(String),

    #[error("Invalid consensus key: {0}")]
    InvalidConsensusKey(String),

    #[error("No blocks received")]
    NoBlocksReceived,

    #[error("Block stream closed: {0}")]
    StreamClosed(String),
}

impl From<reqwest::Error> for WatcherError {
    fn from(e: reqwest::Error) -> Self {
        WatcherError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WatcherError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        WatcherError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for WatcherError {
    fn from(e: serde_json::Error) -> Self {
        WatcherError::Decode(e.to_string())
    }
}
