//! CLI implementation for watchctl
//!
//! Administrative access to sync cursors and watch entries in the store.
//! All commands output pretty JSON.

use crate::interval;
use crate::records::{SyncCursor, WatchRequest};
use crate::store::{CursorStore, RocksStore, WatchlistStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Watcher store CLI tool
#[derive(Parser)]
#[command(name = "watchctl")]
#[command(about = "Inspect and edit sync cursors and watch entries")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./watch_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get the sync cursor of a target
    CursorGet {
        /// Chain symbol, e.g. ETH
        symbol: String,
        /// Network, e.g. mainnet
        network: String,
    },
    /// List sync cursors
    CursorList {
        /// Only cursors of this symbol
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Create or overwrite a sync cursor
    CursorSet {
        symbol: String,
        network: String,
        /// Chain node endpoint URL
        endpoint: String,
        /// Next block height to fetch
        block_index: u64,
        /// Poll delay in milliseconds
        #[arg(long, default_value_t = 1000)]
        sync_delay: u64,
        /// Store the cursor as not syncing
        #[arg(long)]
        stopped: bool,
    },
    /// Register an address to watch
    WatchAdd {
        task_id: String,
        symbol: String,
        network: String,
        /// Address (hex, any case)
        address: String,
        /// URL to POST transfer events to
        #[arg(long)]
        callback_url: Option<String>,
        /// Email address to notify
        #[arg(long)]
        callback_email: Option<String>,
    },
    /// List watch entries of a task on a network
    WatchByTask { task_id: String, network: String },
    /// List watch entries for an address on a network
    WatchByAddress { address: String, network: String },
    /// Delete a watch entry
    WatchDelete { id: u64 },
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = RocksStore::open(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = execute(&store, cli.command)?;

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Execute one command against the store.
pub fn execute(store: &RocksStore, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::CursorGet { symbol, network } => {
            let cursor = store.get_cursor(&symbol, &network)?;
            json!({ "symbol": symbol, "network": network, "cursor": cursor })
        }
        Commands::CursorList { symbol } => {
            let cursors = match symbol {
                Some(symbol) => store.list_cursors_by_symbol(&symbol)?,
                None => store.list_cursors()?,
            };
            json!({ "count": cursors.len(), "cursors": cursors })
        }
        Commands::CursorSet {
            symbol,
            network,
            endpoint,
            block_index,
            sync_delay,
            stopped,
        } => {
            let mut cursor = SyncCursor::new(
                symbol,
                network,
                endpoint,
                block_index,
                interval::clamp(sync_delay),
            );
            cursor.syncing = !stopped;
            let stored = store.upsert_cursor(&cursor)?;
            json!({ "status": "ok", "cursor": stored })
        }
        Commands::WatchAdd {
            task_id,
            symbol,
            network,
            address,
            callback_url,
            callback_email,
        } => {
            if callback_url.is_none() && callback_email.is_none() {
                anyhow::bail!("At least one of --callback-url or --callback-email is required");
            }
            let entry = store.upsert_watch(&WatchRequest {
                task_id,
                symbol,
                network,
                address,
                callback_url,
                callback_email,
            })?;
            json!({ "status": "ok", "watch": entry })
        }
        Commands::WatchByTask { task_id, network } => {
            let entries = store.find_by_task_id(&task_id, &network)?;
            json!({ "count": entries.len(), "watches": entries })
        }
        Commands::WatchByAddress { address, network } => {
            let entries = store.find_by_address(&address, &network)?;
            json!({ "count": entries.len(), "watches": entries })
        }
        Commands::WatchDelete { id } => {
            let existed = store.get_watch(id)?.is_some();
            store.delete_watch(id)?;
            json!({ "status": "ok", "id": id, "deleted": existed })
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["watchctl"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn test_cursor_set_and_get() {
        let (store, _dir) = create_test_store();
        let out = execute(
            &store,
            parse(&["cursor-set", "ETH", "mainnet", "http://node", "42", "--sync-delay", "9000"]),
        )
        .unwrap();
        assert_eq!(out["cursor"]["blockIndex"], 42);
        assert_eq!(out["cursor"]["syncDelay"], 2999);
        assert_eq!(out["cursor"]["syncing"], true);

        let out = execute(&store, parse(&["cursor-get", "ETH", "mainnet"])).unwrap();
        assert_eq!(out["cursor"]["endpoint"], "http://node");

        let out = execute(&store, parse(&["cursor-get", "ETH", "goerli"])).unwrap();
        assert!(out["cursor"].is_null());
    }

    #[test]
    fn test_cursor_list_by_symbol() {
        let (store, _dir) = create_test_store();
        execute(&store, parse(&["cursor-set", "ETH", "mainnet", "http://a", "1"])).unwrap();
        execute(
            &store,
            parse(&["cursor-set", "ETHW", "mainnet", "http://b", "1", "--stopped"]),
        )
        .unwrap();

        let all = execute(&store, parse(&["cursor-list"])).unwrap();
        assert_eq!(all["count"], 2);
        let eth = execute(&store, parse(&["cursor-list", "--symbol", "ETH"])).unwrap();
        assert_eq!(eth["count"], 1);
        assert_eq!(eth["cursors"][0]["symbol"], "ETH");
    }

    #[test]
    fn test_watch_lifecycle() {
        let (store, _dir) = create_test_store();
        let added = execute(
            &store,
            parse(&[
                "watch-add",
                "task-1",
                "ETH",
                "mainnet",
                "0xABCDEF0000000000000000000000000000000001",
                "--callback-url",
                "https://hooks.example/1",
            ]),
        )
        .unwrap();
        let id = added["watch"]["id"].as_u64().unwrap();
        assert_eq!(
            added["watch"]["address"],
            "0xabcdef0000000000000000000000000000000001"
        );

        let by_addr = execute(
            &store,
            parse(&[
                "watch-by-address",
                "0xabcdef0000000000000000000000000000000001",
                "mainnet",
            ]),
        )
        .unwrap();
        assert_eq!(by_addr["count"], 1);

        let by_task = execute(&store, parse(&["watch-by-task", "task-1", "mainnet"])).unwrap();
        assert_eq!(by_task["watches"][0]["id"], id);

        let deleted = execute(&store, parse(&["watch-delete", &id.to_string()])).unwrap();
        assert_eq!(deleted["deleted"], true);
        let again = execute(&store, parse(&["watch-delete", &id.to_string()])).unwrap();
        assert_eq!(again["deleted"], false);
    }

    #[test]
    fn test_watch_add_requires_callback() {
        let (store, _dir) = create_test_store();
        let cmd = parse(&["watch-add", "t", "ETH", "mainnet", "0x01"]);
        assert!(execute(&store, cmd).is_err());
    }
}
