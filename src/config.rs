//! Configuration loading
//!
//! Handles loading sync targets from a file and the block explorer URLs
//! used in notification emails.
//!
//! Each target line has the form
//! `SYMBOL NETWORK ENDPOINT [BLOCK_INDEX] [SYNC_DELAY_MS]`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A chain target the watcher should sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub symbol: String,
    pub network: String,
    pub endpoint: String,
    /// Start height for a fresh cursor; ignored when a cursor already exists
    pub block_index: Option<u64>,
    pub sync_delay: Option<u64>,
}

/// Load sync targets from a file.
///
/// Empty lines and lines starting with '#' are ignored.
///
/// # Example file format:
/// ```text
/// # symbol network endpoint [block_index] [sync_delay_ms]
/// ETH mainnet https://eth.llamarpc.com 19000000 1000
/// ETH sepolia http://127.0.0.1:8545
/// ```
pub fn load_targets(path: &Path) -> Result<Vec<SyncTarget>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read targets file: {:?}", path))?;

    let mut targets = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let target = parse_target(line)
            .with_context(|| format!("Invalid target on line {}: {}", line_num + 1, line))?;

        if targets
            .iter()
            .any(|t: &SyncTarget| t.symbol == target.symbol && t.network == target.network)
        {
            anyhow::bail!(
                "Duplicate target {}/{} on line {}",
                target.symbol,
                target.network,
                line_num + 1
            );
        }
        targets.push(target);
    }

    if targets.is_empty() {
        anyhow::bail!("Targets file is empty (no valid targets found)");
    }

    Ok(targets)
}

/// Parse one target line.
fn parse_target(line: &str) -> Result<SyncTarget> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 || parts.len() > 5 {
        anyhow::bail!(
            "Expected SYMBOL NETWORK ENDPOINT [BLOCK_INDEX] [SYNC_DELAY_MS], got {} fields",
            parts.len()
        );
    }

    let block_index = parts
        .get(3)
        .map(|s| s.parse::<u64>().context("Invalid block index"))
        .transpose()?;
    let sync_delay = parts
        .get(4)
        .map(|s| s.parse::<u64>().context("Invalid sync delay"))
        .transpose()?;

    Ok(SyncTarget {
        symbol: parts[0].to_string(),
        network: parts[1].to_string(),
        endpoint: parts[2].to_string(),
        block_index,
        sync_delay,
    })
}

/// Block explorer transaction URLs per (symbol, network).
#[derive(Debug, Clone)]
pub struct ExplorerUrls {
    urls: HashMap<(String, String), String>,
}

impl Default for ExplorerUrls {
    fn default() -> Self {
        let mut urls = HashMap::new();
        for (network, base) in [
            ("mainnet", "https://etherscan.io/tx"),
            ("ropsten", "https://ropsten.etherscan.io/tx"),
            ("rinkeby", "https://rinkeby.etherscan.io/tx"),
            ("kovan", "https://kovan.etherscan.io/tx"),
            ("goerli", "https://goerli.etherscan.io/tx"),
            ("sepolia", "https://sepolia.etherscan.io/tx"),
        ] {
            urls.insert(("ETH".to_string(), network.to_string()), base.to_string());
        }
        Self { urls }
    }
}

impl ExplorerUrls {
    /// Apply an override of the form `SYMBOL:NETWORK=URL`.
    pub fn apply_override(&mut self, spec: &str) -> Result<()> {
        let (key, url) = spec
            .split_once('=')
            .with_context(|| format!("Explorer override must be SYMBOL:NETWORK=URL: {}", spec))?;
        let (symbol, network) = key
            .split_once(':')
            .with_context(|| format!("Explorer override must be SYMBOL:NETWORK=URL: {}", spec))?;
        if symbol.is_empty() || network.is_empty() || url.is_empty() {
            anyhow::bail!("Explorer override has an empty part: {}", spec);
        }
        self.urls.insert(
            (symbol.to_string(), network.to_string()),
            url.trim_end_matches('/').to_string(),
        );
        Ok(())
    }

    /// Base URL for transactions of (symbol, network).
    pub fn base_url(&self, symbol: &str, network: &str) -> Option<&str> {
        self.urls
            .get(&(symbol.to_string(), network.to_string()))
            .map(String::as_str)
    }

    /// Explorer link for a transaction, `<base>/<tx_hash>`.
    pub fn tx_url(&self, symbol: &str, network: &str, tx_hash: &str) -> Option<String> {
        self.base_url(symbol, network)
            .map(|base| format!("{}/{}", base, tx_hash))
    }
}
