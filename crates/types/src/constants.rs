pub mod address {
    pub const CONSENSUS_ADDRESS_SIZE: usize = 20;
}

pub mod token {
    pub const DEFAULT_COEFFICIENT: u64 = 1_000_000;
}

pub mod missed_blocks {
    pub const BASE_ALERT_THRESHOLD: u64 = 10;
    pub const ALERT_THRESHOLD_STEP: u64 = 150;
}

pub mod timing {
    pub const ENDPOINT_BACKOFF_SECONDS: u64 = 5;
    pub const WATCHDOG_POLL_SECONDS: u64 = 10;
    pub const STALE_BLOCK_SECONDS: u64 = 30;
    pub const VALIDATOR_RECHECK_SECONDS: u64 = 30;
    pub const STREAM_SILENCE_SECONDS: u64 = 45;
    pub const TX_FETCH_RETRY_MILLIS: u64 = 250;
}

pub mod stream {
    pub const BLOCK_CHANNEL_CAPACITY: usize = 10;
    pub const NEW_BLOCK_QUERY: &str = "tm.event='NewBlock'";
}

pub mod staking {
    pub const QUERY_VALIDATOR_PATH: &str = "/cosmos.staking.v1beta1.Query/Validator";
    pub const BOND_STATUS_BONDED: u64 = 3;
    pub const ED25519_PUBKEY_TYPE_URL: &str = "/cosmos.crypto.ed25519.PubKey";
}

pub mod events {
    pub const DELEGATE: &str = "delegate";
    pub const REDELEGATE: &str = "redelegate";
    pub const UNBOND: &str = "unbond";
}
