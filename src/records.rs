//! Record types for persisted watcher state
//!
//! These structs represent the data stored in the store.
//! They use postcard for binary serialization, which is compact and deterministic,
//! and serde_json for CLI output.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sync position for one (symbol, network) target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    /// Chain identifier, e.g. "ETH"
    pub symbol: String,
    /// Network identifier, e.g. "mainnet"
    pub network: String,
    /// Next block height to fetch
    pub block_index: u64,
    /// Whether an engine should currently be advancing this cursor
    pub syncing: bool,
    /// Current inter-poll delay in milliseconds
    pub sync_delay: u64,
    /// Chain node endpoint in use
    pub endpoint: String,
    /// Unix millis, set by the store on first write
    pub created_at: u64,
    /// Unix millis, set by the store on every write
    pub updated_at: u64,
}

impl SyncCursor {
    /// Build a cursor that has not been persisted yet.
    pub fn new(
        symbol: impl Into<String>,
        network: impl Into<String>,
        endpoint: impl Into<String>,
        block_index: u64,
        sync_delay: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            network: network.into(),
            block_index,
            syncing: true,
            sync_delay,
            endpoint: endpoint.into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Short tag used in log lines.
    pub fn tag(&self) -> String {
        format!("[{}/{}]", self.symbol, self.network)
    }
}

/// A registered address of interest with its delivery preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEntry {
    /// Store-assigned id, stable across upserts of the same identity key
    pub id: u64,
    pub task_id: String,
    pub symbol: String,
    pub network: String,
    /// Always lower-cased
    pub address: String,
    pub callback_url: Option<String>,
    pub callback_email: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl WatchEntry {
    /// Non-empty callback URL, if any.
    pub fn webhook(&self) -> Option<&str> {
        self.callback_url.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Non-empty callback email, if any.
    pub fn email(&self) -> Option<&str> {
        self.callback_email.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// Registration payload for a watch entry.
///
/// (task_id, symbol, network, address) is the identity key; writing the same
/// key again replaces the callback fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub task_id: String,
    pub symbol: String,
    pub network: String,
    pub address: String,
    pub callback_url: Option<String>,
    pub callback_email: Option<String>,
}

/// Normalize an address for storage and lookup.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
