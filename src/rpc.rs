//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to Ethereum JSON-RPC endpoints.
//! Handles hex string parsing and error handling.

use crate::chain::ChainReader;
use crate::types::{decode_hex, BlockInfo, TokenMetadata, Transaction};
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// `name()`
const NAME_SELECTOR: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
/// `symbol()`
const SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
/// `decimals()`
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send RPC request {}", method))?;

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error: {}", error);
        }

        // Extract result
        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    /// `eth_call` against the latest block, returning raw return data.
    async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>> {
        let params = json!([
            {
                "to": format!("0x{:x}", to),
                "data": format!("0x{}", hex::encode(data)),
            },
            "latest"
        ]);
        let result = self.call("eth_call", params).await?;
        let s = result.as_str().context("eth_call result is not a string")?;
        decode_hex(s).context("Failed to decode eth_call result")
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn get_block(&self, height: u64) -> Result<Option<BlockInfo>> {
        let params = json!([format!("0x{:x}", height), false]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .context("Failed to deserialize block")
    }

    async fn get_transaction(&self, hash: B256) -> Result<Transaction> {
        let params = json!([format!("0x{:x}", hash)]);
        let result = self.call("eth_getTransactionByHash", params).await?;
        if result.is_null() {
            anyhow::bail!("Transaction {:?} not found", hash);
        }
        serde_json::from_value(result).context("Failed to deserialize transaction")
    }

    async fn get_token_metadata(&self, contract: Address) -> Result<TokenMetadata> {
        let name = self
            .eth_call(contract, &NAME_SELECTOR)
            .await
            .context("Failed to call name()")?;
        let symbol = self
            .eth_call(contract, &SYMBOL_SELECTOR)
            .await
            .context("Failed to call symbol()")?;
        let decimals = self
            .eth_call(contract, &DECIMALS_SELECTOR)
            .await
            .context("Failed to call decimals()")?;

        Ok(TokenMetadata {
            name: decode_abi_string(&name).context("Invalid name() return data")?,
            symbol: decode_abi_string(&symbol).context("Invalid symbol() return data")?,
            decimals: decode_abi_u8(&decimals).context("Invalid decimals() return data")?,
        })
    }
}

/// Decode an ABI-encoded `string` return value.
///
/// Some older tokens return `bytes32` instead; a single 32-byte word is
/// read as a NUL-padded string.
pub fn decode_abi_string(data: &[u8]) -> Result<String> {
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        return Ok(String::from_utf8_lossy(&data[..end]).into_owned());
    }
    if data.len() < 64 {
        anyhow::bail!("String return data too short: {} bytes", data.len());
    }

    let offset = word_to_usize(&data[0..32]).context("Invalid string offset")?;
    let len_end = offset
        .checked_add(32)
        .filter(|end| *end <= data.len())
        .context("String offset out of range")?;
    let len = word_to_usize(&data[offset..len_end]).context("Invalid string length")?;
    let end = len_end
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .context("String length out of range")?;

    Ok(String::from_utf8_lossy(&data[len_end..end]).into_owned())
}

/// Decode an ABI-encoded `uint8` return value.
pub fn decode_abi_u8(data: &[u8]) -> Result<u8> {
    if data.len() < 32 {
        anyhow::bail!("uint8 return data too short: {} bytes", data.len());
    }
    let value = U256::from_be_slice(&data[0..32]);
    if value > U256::from(u8::MAX) {
        anyhow::bail!("decimals() out of range: {}", value);
    }
    Ok(data[31])
}

fn word_to_usize(word: &[u8]) -> Result<usize> {
    let value = U256::from_be_slice(word);
    if value > U256::from(u32::MAX) {
        anyhow::bail!("ABI word too large: {}", value);
    }
    Ok(value.as_limbs()[0] as usize)
}
