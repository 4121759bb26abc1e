//! Chain watcher daemon
//!
//! Follows the configured chains block by block and notifies watch entries
//! about native and ERC20 transfers touching their addresses.

use anyhow::{Context, Result};
use chainwatch::chain::ChainReader;
use chainwatch::config::{load_targets, ExplorerUrls};
use chainwatch::notify::{Dispatcher, HttpMailRelay, HttpWebhook, LogMailer, MailTransport};
use chainwatch::registry::ReaderFactory;
use chainwatch::rpc::RpcClient;
use chainwatch::{RocksStore, SyncRegistry};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Chain watcher
#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Follow chains and notify watched addresses about transfers")]
struct Args {
    /// Path to RocksDB database directory
    #[arg(short, long, default_value = "./watch_db")]
    db_path: PathBuf,

    /// Targets file (SYMBOL NETWORK ENDPOINT [BLOCK_INDEX] [SYNC_DELAY_MS] per line)
    #[arg(short, long)]
    targets: Option<PathBuf>,

    /// Resume every stored cursor of this symbol left syncing (repeatable)
    #[arg(short, long)]
    resume: Vec<String>,

    /// HTTP mail relay endpoint; emails are only logged when unset
    #[arg(long)]
    mail_relay_url: Option<String>,

    /// Bearer token for the mail relay
    #[arg(long)]
    mail_relay_token: Option<String>,

    /// Explorer transaction URL override, SYMBOL:NETWORK=URL (repeatable)
    #[arg(long)]
    explorer: Vec<String>,

    /// Timeout for webhook and mail relay requests, in seconds
    #[arg(long, default_value_t = 10)]
    delivery_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.targets.is_none() && args.resume.is_empty() {
        anyhow::bail!("Nothing to sync: pass --targets and/or --resume");
    }

    info!("Starting chain watcher");
    info!("Database: {:?}", args.db_path);

    let store = Arc::new(
        RocksStore::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );

    let mut explorers = ExplorerUrls::default();
    for spec in &args.explorer {
        explorers.apply_override(spec)?;
    }

    let timeout = Duration::from_secs(args.delivery_timeout);
    let mail: Arc<dyn MailTransport> = match args.mail_relay_url {
        Some(url) => {
            info!("Mail relay: {}", url);
            Arc::new(HttpMailRelay::new(url, args.mail_relay_token, timeout)?)
        }
        None => {
            info!("No mail relay configured; emails will only be logged");
            Arc::new(LogMailer)
        }
    };
    let dispatcher = Dispatcher::new(Arc::new(HttpWebhook::new(timeout)?), mail, explorers);

    let readers: ReaderFactory = Arc::new(|endpoint: &str| -> Result<Arc<dyn ChainReader>> {
        let reader: Arc<dyn ChainReader> = Arc::new(RpcClient::new(endpoint.to_string())?);
        Ok(reader)
    });
    let registry = SyncRegistry::new(store.clone(), store.clone(), Arc::new(dispatcher), readers);

    if let Some(path) = &args.targets {
        let targets = load_targets(path).context("Failed to load targets")?;
        info!("Loaded {} targets from {:?}", targets.len(), path);
        registry.start_targets(targets);
    }
    for symbol in &args.resume {
        registry.resume_symbol(symbol)?;
    }

    let running = registry.running()?;
    if running.is_empty() {
        warn!("No targets are syncing, exiting");
        return Ok(());
    }
    info!("Syncing {} targets", running.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down gracefully...");

    registry.shutdown().await?;
    info!("Watcher stopped");
    Ok(())
}
