//! Delegation and undelegation activity for the tracked validator.
//!
//! Staking events carry a flat attribute list in which repeated instances are
//! concatenated; a group ends when a key repeats. Each group is decoded against
//! the keys its event kind requires, and a group missing one of them is skipped.

use crate::config::ChainConfig;
use tracing::{debug, trace};
use valwatch_types::{events, Attribute, Block, LogEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgDelegate {
    pub validator: String,
    pub amount: String,
    pub shares: String,
}

impl MsgDelegate {
    pub fn raw_amount(&self) -> Option<f64> {
        self.shares
            .trim()
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
    }
}

/// Both `redelegate` (attributed to the source validator) and `unbond`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgUndelegate {
    pub validator: String,
    pub amount: String,
}

impl MsgUndelegate {
    /// Amounts carry a denom suffix such as `1500000uatom`.
    pub fn raw_amount(&self) -> Option<f64> {
        let digits: String = self.amount.chars().filter(char::is_ascii_digit).collect();
        digits.parse().ok().filter(|v: &f64| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StakeChange {
    Delegation(f64),
    Undelegation(f64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedGroup {
    pub kind: String,
    pub missing: &'static str,
}

/// Splits a flat attribute list into one slice per event instance.
pub fn group_attributes(attributes: &[Attribute]) -> Vec<&[Attribute]> {
    let mut groups = Vec::new();
    let mut start = 0;

    for i in 0..attributes.len() {
        let repeats = attributes[start..i]
            .iter()
            .any(|attr| attr.key == attributes[i].key);
        if repeats {
            groups.push(&attributes[start..i]);
            start = i;
        }
    }
    if start < attributes.len() {
        groups.push(&attributes[start..]);
    }

    groups
}

fn field<'a>(
    kind: &str,
    group: &'a [Attribute],
    key: &'static str,
) -> Result<&'a str, MalformedGroup> {
    group
        .iter()
        .find(|attr| attr.key == key)
        .map(|attr| attr.value.as_str())
        .ok_or_else(|| MalformedGroup {
            kind: kind.to_string(),
            missing: key,
        })
}

fn decode_delegate(group: &[Attribute]) -> Result<MsgDelegate, MalformedGroup> {
    Ok(MsgDelegate {
        validator: field(events::DELEGATE, group, "validator")?.to_string(),
        amount: field(events::DELEGATE, group, "amount")?.to_string(),
        shares: field(events::DELEGATE, group, "new_shares")?.to_string(),
    })
}

fn decode_undelegate(kind: &str, group: &[Attribute]) -> Result<MsgUndelegate, MalformedGroup> {
    let validator_key = if kind == events::REDELEGATE {
        "source_validator"
    } else {
        "validator"
    };

    Ok(MsgUndelegate {
        validator: field(kind, group, validator_key)?.to_string(),
        amount: field(kind, group, "amount")?.to_string(),
    })
}

fn decode_groups<T>(
    event: &LogEvent,
    decode: impl Fn(&[Attribute]) -> Result<T, MalformedGroup>,
) -> Vec<T> {
    group_attributes(&event.attributes)
        .into_iter()
        .filter_map(|group| match decode(group) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!(kind = %e.kind, missing = e.missing, "Skipping malformed event group");
                None
            }
        })
        .collect()
}

pub fn delegations(block: &Block) -> Vec<MsgDelegate> {
    block
        .events()
        .filter(|event| event.kind == events::DELEGATE)
        .flat_map(|event| decode_groups(event, decode_delegate))
        .collect()
}

pub fn undelegations(block: &Block) -> Vec<MsgUndelegate> {
    block
        .events()
        .filter(|event| event.kind == events::REDELEGATE || event.kind == events::UNBOND)
        .flat_map(|event| decode_groups(event, |group| decode_undelegate(&event.kind, group)))
        .collect()
}

/// Filters staking activity down to notifications for one chain's validator.
#[derive(Debug, Clone)]
pub struct DelegationExtractor {
    validator_address: String,
    coefficient: f64,
    minimum: f64,
}

impl DelegationExtractor {
    pub fn new(validator_address: impl Into<String>, coefficient: u64, minimum: f64) -> Self {
        Self {
            validator_address: validator_address.into(),
            coefficient: coefficient as f64,
            minimum,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        Self::new(
            config.validator_address.clone(),
            config.token_coefficient(),
            config.notification.minimum_delegation,
        )
    }

    pub fn scale(&self, raw: f64) -> f64 {
        raw / self.coefficient
    }

    fn accept(&self, validator: &str, raw: Option<f64>) -> Option<f64> {
        if validator != self.validator_address {
            return None;
        }
        let amount = self.scale(raw?);
        if amount > self.minimum {
            Some(amount)
        } else {
            trace!(amount, minimum = self.minimum, "Staking change below minimum");
            None
        }
    }

    pub fn extract(&self, block: &Block) -> Vec<StakeChange> {
        let delegated = delegations(block)
            .into_iter()
            .filter_map(|msg| self.accept(&msg.validator, msg.raw_amount()))
            .map(StakeChange::Delegation);

        let undelegated = undelegations(block)
            .into_iter()
            .filter_map(|msg| self.accept(&msg.validator, msg.raw_amount()))
            .map(StakeChange::Undelegation);

        delegated.chain(undelegated).collect()
    }
}
