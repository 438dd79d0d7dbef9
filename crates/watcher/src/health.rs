//! Validator health signals derived from the validator record and the block stream.
//!
//! Every condition that can alert is held in an [`AlertState`], so an alert and
//! its recovery are each reported once per edge, never while the condition
//! persists.

use valwatch_types::{missed_blocks, Block, ConsensusAddress, Height, ValidatorRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Healthy,
    Alerting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Raised,
    Cleared,
}

impl AlertState {
    /// Feeds the current condition; returns the edge crossed, if any.
    pub fn update(&mut self, failing: bool) -> Option<Edge> {
        match (*self, failing) {
            (AlertState::Healthy, true) => {
                *self = AlertState::Alerting;
                Some(Edge::Raised)
            }
            (AlertState::Alerting, false) => {
                *self = AlertState::Healthy;
                Some(Edge::Cleared)
            }
            _ => None,
        }
    }

    pub fn is_alerting(&self) -> bool {
        *self == AlertState::Alerting
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    Jailed,
    Unjailed,
    Unbonded,
    Bonded,
    MissedBlocks { missed: u64 },
    SigningAgain { missed: u64 },
}

impl HealthEvent {
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            HealthEvent::Jailed | HealthEvent::Unbonded | HealthEvent::MissedBlocks { .. }
        )
    }

    pub fn message(&self, chain: &str, moniker: &str) -> String {
        match self {
            HealthEvent::Jailed => format!("[{}] {} is jailed", chain, moniker),
            HealthEvent::Unjailed => format!("[{}] {} is un-jailed", chain, moniker),
            HealthEvent::Unbonded => {
                format!("[{}] validator: {} is not in the active set", chain, moniker)
            }
            HealthEvent::Bonded => {
                format!("[{}] validator: {} is back in the active set", chain, moniker)
            }
            HealthEvent::MissedBlocks { missed } => {
                format!("[{}] {} missed {} blocks", chain, moniker, missed)
            }
            HealthEvent::SigningAgain { missed } => format!(
                "[{}] {} is signing blocks again, missed blocks: {}",
                chain, moniker, missed
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightGap {
    pub from: Height,
    pub to: Height,
}

/// What one block did to the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub gap: Option<HeightGap>,
    /// `None` while signature tracking is suspended.
    pub signed: Option<bool>,
    pub event: Option<HealthEvent>,
}

/// Per-connection watcher state for one validator.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    consensus_address: ConsensusAddress,
    last_height: Height,
    missed_blocks: u64,
    alert_threshold: u64,
    jailed: AlertState,
    unbonded: AlertState,
}

impl HealthTracker {
    pub fn new(consensus_address: ConsensusAddress) -> Self {
        Self {
            consensus_address,
            last_height: 0,
            missed_blocks: 0,
            alert_threshold: missed_blocks::BASE_ALERT_THRESHOLD,
            jailed: AlertState::Healthy,
            unbonded: AlertState::Healthy,
        }
    }

    pub fn last_height(&self) -> Height {
        self.last_height
    }

    pub fn missed_blocks(&self) -> u64 {
        self.missed_blocks
    }

    pub fn alert_threshold(&self) -> u64 {
        self.alert_threshold
    }

    /// Missed blocks are not counted while the validator is jailed or out of the active set.
    pub fn is_suspended(&self) -> bool {
        self.jailed.is_alerting() || self.unbonded.is_alerting()
    }

    pub fn observe_record(&mut self, record: &ValidatorRecord) -> Vec<HealthEvent> {
        self.consensus_address = record.consensus_address;

        let mut events = Vec::new();

        match self.jailed.update(record.jailed) {
            Some(Edge::Raised) => events.push(HealthEvent::Jailed),
            Some(Edge::Cleared) => events.push(HealthEvent::Unjailed),
            None => {}
        }

        match self.unbonded.update(!record.bonded) {
            Some(Edge::Raised) => events.push(HealthEvent::Unbonded),
            Some(Edge::Cleared) => events.push(HealthEvent::Bonded),
            None => {}
        }

        if self.is_suspended() {
            self.reset_missed();
        }

        events
    }

    pub fn observe_block(&mut self, block: &Block) -> BlockReport {
        let mut report = BlockReport::default();

        if self.last_height != 0 && block.height > self.last_height + 1 {
            report.gap = Some(HeightGap {
                from: self.last_height,
                to: block.height,
            });
        }
        self.last_height = block.height;

        if self.is_suspended() {
            return report;
        }

        let signed = block.is_signed_by(&self.consensus_address);
        report.signed = Some(signed);
        report.event = if signed {
            self.record_signed()
        } else {
            self.record_missed()
        };

        report
    }

    fn record_missed(&mut self) -> Option<HealthEvent> {
        self.missed_blocks += 1;
        if self.missed_blocks > self.alert_threshold {
            self.alert_threshold += missed_blocks::ALERT_THRESHOLD_STEP;
            return Some(HealthEvent::MissedBlocks {
                missed: self.missed_blocks,
            });
        }
        None
    }

    fn record_signed(&mut self) -> Option<HealthEvent> {
        let missed = self.missed_blocks;
        let event = (missed > 0 && missed < self.alert_threshold)
            .then_some(HealthEvent::SigningAgain { missed });
        self.reset_missed();
        event
    }

    fn reset_missed(&mut self) {
        self.missed_blocks = 0;
        self.alert_threshold = missed_blocks::BASE_ALERT_THRESHOLD;
    }
}
