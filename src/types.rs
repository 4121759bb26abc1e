//! Ethereum JSON-RPC types
//!
//! Type definitions for blocks, transactions and token metadata
//! returned from Ethereum JSON-RPC endpoints.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer, Serialize};

/// Block header with transaction hashes only (`eth_getBlockByNumber(n, false)`).
#[derive(Debug, Clone, Deserialize)]
pub struct BlockInfo {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Hashes of the transactions in the block, in block order
    #[serde(rename = "transactions", default, deserialize_with = "deserialize_hex_b256_vec")]
    pub transactions: Vec<B256>,
}

/// Ethereum transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    /// Transaction hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Sender address (hex string in JSON)
    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// Recipient address (None for contract creation, hex string in JSON)
    #[serde(rename = "to", default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Value transferred in wei (hex string in JSON)
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,

    /// Transaction input data (hex string in JSON, "0x" for simple transfers)
    #[serde(rename = "input", deserialize_with = "deserialize_hex_bytes")]
    pub input: Vec<u8>,
}

/// ERC20 token metadata resolved through `name()`, `symbol()` and `decimals()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
pub(crate) fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Decode a `0x`-prefixed (or bare) hex string into bytes.
pub(crate) fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(Vec::new());
    }
    hex::decode(pad_hex_string(s))
}

fn parse_b256<E: serde::de::Error>(s: &str) -> Result<B256, E> {
    let bytes = decode_hex(s).map_err(E::custom)?;
    if bytes.len() != 32 {
        return Err(E::custom(format!(
            "Expected 32 bytes for hash, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn parse_address<E: serde::de::Error>(s: &str) -> Result<Address, E> {
    let bytes = decode_hex(s).map_err(E::custom)?;
    if bytes.len() != 20 {
        return Err(E::custom(format!(
            "Expected 20 bytes for address, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Deserialize a hex string to u64.
fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    u64::from_str_radix(s, 16).map_err(serde::de::Error::custom)
}

/// Deserialize a hex string to U256.
///
/// Parsed as a big-endian unsigned integer so values above 2^53 stay exact.
fn deserialize_hex_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let bytes = decode_hex(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() > 32 {
        return Err(serde::de::Error::custom("Value wider than 256 bits"));
    }
    Ok(U256::from_be_slice(&bytes))
}

/// Deserialize a hex string to B256.
fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_b256(&s)
}

/// Deserialize a list of hex transaction hashes.
fn deserialize_hex_b256_vec<'de, D>(deserializer: D) -> Result<Vec<B256>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Vec::<String>::deserialize(deserializer)?;
    items.iter().map(|s| parse_b256(s)).collect()
}

/// Deserialize a hex string to Address.
fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_address(&s)
}

/// Deserialize an optional hex string to Address.
fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) if !s.trim_start_matches("0x").is_empty() => parse_address(&s).map(Some),
        _ => Ok(None),
    }
}

/// Deserialize a hex string to bytes.
fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    decode_hex(&s).map_err(serde::de::Error::custom)
}
