use crate::error::WatcherError;
use crate::proto::{encode_string_field, FieldReader};
use crate::rpc_client::{RpcClient, RpcClientConfig};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use valwatch_types::{staking, ConsensusAddress, ValidatorRecord};

/// Chain Query Service: on-chain validator metadata.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn query_validator(
        &self,
        endpoint: &str,
        operator_address: &str,
    ) -> Result<ValidatorRecord, WatcherError>;
}

/// Queries the staking module through Tendermint `abci_query`.
#[derive(Debug, Default, Clone)]
pub struct RpcChainQuery;

#[async_trait]
impl ChainQuery for RpcChainQuery {
    async fn query_validator(
        &self,
        endpoint: &str,
        operator_address: &str,
    ) -> Result<ValidatorRecord, WatcherError> {
        let client = RpcClient::new(RpcClientConfig::new(endpoint))?;
        let request = encode_string_field(1, operator_address);

        let value = client
            .abci_query(staking::QUERY_VALIDATOR_PATH, &request)
            .await?
            .ok_or_else(|| WatcherError::ValidatorNotFound(operator_address.to_string()))?;

        decode_validator_response(operator_address, &value)
    }
}

/// Decodes a `QueryValidatorResponse`.
pub fn decode_validator_response(
    operator_address: &str,
    buf: &[u8],
) -> Result<ValidatorRecord, WatcherError> {
    let mut validator = None;
    for field in FieldReader::new(buf) {
        let (number, value) = field?;
        if number == 1 {
            validator = Some(value.as_bytes()?);
        }
    }

    let validator =
        validator.ok_or_else(|| WatcherError::ValidatorNotFound(operator_address.to_string()))?;

    let mut record_operator = operator_address.to_string();
    let mut pubkey = None;
    let mut jailed = false;
    let mut status = 0;
    let mut moniker = String::new();

    for field in FieldReader::new(validator) {
        let (number, value) = field?;
        match number {
            1 => record_operator = value.as_str()?.to_string(),
            2 => pubkey = Some(value.as_bytes()?),
            3 => jailed = value.as_varint()? != 0,
            4 => status = value.as_varint()?,
            7 => moniker = decode_moniker(value.as_bytes()?)?,
            _ => {}
        }
    }

    let pubkey = pubkey.ok_or_else(|| {
        WatcherError::InvalidConsensusKey(format!("{} has no consensus key", operator_address))
    })?;

    Ok(ValidatorRecord {
        operator_address: record_operator,
        moniker,
        jailed,
        bonded: status == staking::BOND_STATUS_BONDED,
        consensus_address: consensus_address_from_any(pubkey)?,
    })
}

fn decode_moniker(description: &[u8]) -> Result<String, WatcherError> {
    for field in FieldReader::new(description) {
        let (number, value) = field?;
        if number == 1 {
            return Ok(value.as_str()?.to_string());
        }
    }
    Ok(String::new())
}

/// Derives the consensus address from a protobuf `Any` wrapping the consensus key.
pub fn consensus_address_from_any(any: &[u8]) -> Result<ConsensusAddress, WatcherError> {
    let mut type_url = "";
    let mut value: &[u8] = &[];
    for field in FieldReader::new(any) {
        let (number, field_value) = field?;
        match number {
            1 => type_url = field_value.as_str()?,
            2 => value = field_value.as_bytes()?,
            _ => {}
        }
    }

    if type_url != staking::ED25519_PUBKEY_TYPE_URL {
        return Err(WatcherError::InvalidConsensusKey(format!(
            "unsupported key type {:?}",
            type_url
        )));
    }

    let mut key: &[u8] = &[];
    for field in FieldReader::new(value) {
        let (number, field_value) = field?;
        if number == 1 {
            key = field_value.as_bytes()?;
        }
    }

    consensus_address_from_ed25519(key)
}

pub fn consensus_address_from_ed25519(key: &[u8]) -> Result<ConsensusAddress, WatcherError> {
    if key.len() != 32 {
        return Err(WatcherError::InvalidConsensusKey(format!(
            "ed25519 key must be 32 bytes, got {}",
            key.len()
        )));
    }

    let digest = Sha256::digest(key);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[..20]);
    Ok(address)
}
