//! Sync registry
//!
//! Owns the running engine tasks, at most one per (symbol, network).
//! Each task gets its own cancellation token so targets can be stopped
//! individually or all at once on shutdown.

use crate::chain::ChainReader;
use crate::config::SyncTarget;
use crate::engine::SyncEngine;
use crate::interval;
use crate::notify::Dispatcher;
use crate::records::SyncCursor;
use crate::store::{CursorStore, WatchlistStore};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builds a chain reader for an endpoint URL.
pub type ReaderFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn ChainReader>> + Send + Sync>;

type TargetKey = (String, String);

/// Request to begin syncing a target from an explicit position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSync {
    pub symbol: String,
    pub network: String,
    pub endpoint: String,
    pub block_index: u64,
    pub sync_delay: u64,
}

struct RunningTarget {
    cancel: CancellationToken,
    handle: JoinHandle<SyncCursor>,
}

pub struct SyncRegistry {
    cursors: Arc<dyn CursorStore>,
    watchlist: Arc<dyn WatchlistStore>,
    dispatcher: Arc<Dispatcher>,
    readers: ReaderFactory,
    targets: Mutex<HashMap<TargetKey, RunningTarget>>,
}

impl SyncRegistry {
    pub fn new(
        cursors: Arc<dyn CursorStore>,
        watchlist: Arc<dyn WatchlistStore>,
        dispatcher: Arc<Dispatcher>,
        readers: ReaderFactory,
    ) -> Self {
        Self {
            cursors,
            watchlist,
            dispatcher,
            readers,
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a fresh cursor for the request and start its engine.
    ///
    /// Fails if the target already has a running engine.
    pub fn start(&self, request: StartSync) -> Result<SyncCursor> {
        let mut targets = self.lock()?;
        let key = (request.symbol.clone(), request.network.clone());
        if is_running(&targets, &key) {
            anyhow::bail!("{}/{} is already syncing", key.0, key.1);
        }

        let cursor = SyncCursor::new(
            request.symbol,
            request.network,
            request.endpoint,
            request.block_index,
            interval::clamp(request.sync_delay),
        );
        let cursor = self
            .cursors
            .upsert_cursor(&cursor)
            .with_context(|| format!("Failed to store cursor for {}", cursor.tag()))?;
        self.spawn(&mut targets, cursor.clone())?;
        Ok(cursor)
    }

    /// Start an engine from a stored cursor, marking it as syncing.
    ///
    /// Returns false when the target is already running.
    pub fn resume(&self, cursor: SyncCursor) -> Result<bool> {
        let mut targets = self.lock()?;
        let key = (cursor.symbol.clone(), cursor.network.clone());
        if is_running(&targets, &key) {
            return Ok(false);
        }

        let cursor = SyncCursor {
            syncing: true,
            sync_delay: interval::clamp(cursor.sync_delay),
            ..cursor
        };
        let cursor = self
            .cursors
            .upsert_cursor(&cursor)
            .with_context(|| format!("Failed to store cursor for {}", cursor.tag()))?;
        self.spawn(&mut targets, cursor)?;
        Ok(true)
    }

    /// Resume every stored cursor of `symbol` that was left syncing.
    ///
    /// Returns the number of engines started.
    pub fn resume_symbol(&self, symbol: &str) -> Result<usize> {
        let cursors = self
            .cursors
            .list_cursors_by_symbol(symbol)
            .with_context(|| format!("Failed to list cursors for {}", symbol))?;

        let mut started = 0;
        for cursor in cursors.into_iter().filter(|c| c.syncing) {
            let tag = cursor.tag();
            match self.resume(cursor) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!("{} Failed to resume: {:?}", tag, e),
            }
        }
        info!("Resumed {} {} targets", started, symbol);
        Ok(started)
    }

    /// Start every configured target, continuing from stored cursors.
    ///
    /// A target that cannot start is logged and skipped. Returns the number
    /// of engines started.
    pub fn start_targets(&self, targets: Vec<SyncTarget>) -> usize {
        let mut started = 0;
        for target in targets {
            let tag = format!("[{}/{}]", target.symbol, target.network);
            match self.start_target(target) {
                Ok(true) => started += 1,
                Ok(false) => warn!("{} Already running", tag),
                Err(e) => warn!("{} Failed to start: {:?}", tag, e),
            }
        }
        started
    }

    fn start_target(&self, target: SyncTarget) -> Result<bool> {
        let existing = self
            .cursors
            .get_cursor(&target.symbol, &target.network)
            .context("Failed to read stored cursor")?;
        match existing {
            Some(existing) => {
                let cursor = SyncCursor {
                    endpoint: target.endpoint,
                    sync_delay: target.sync_delay.unwrap_or(existing.sync_delay),
                    ..existing
                };
                info!(
                    "{} Continuing from stored block {}",
                    cursor.tag(),
                    cursor.block_index
                );
                self.resume(cursor)
            }
            None => {
                let block_index = target
                    .block_index
                    .context("No stored cursor, BLOCK_INDEX is required")?;
                self.start(StartSync {
                    symbol: target.symbol,
                    network: target.network,
                    endpoint: target.endpoint,
                    block_index,
                    sync_delay: target.sync_delay.unwrap_or(interval::DEFAULT_SYNC_DELAY),
                })?;
                Ok(true)
            }
        }
    }

    /// Stop a target's engine and persist it as not syncing.
    ///
    /// Returns `None` if the target was not running.
    pub async fn stop(&self, symbol: &str, network: &str) -> Result<Option<SyncCursor>> {
        let key = (symbol.to_string(), network.to_string());
        let target = self.lock()?.remove(&key);
        let Some(target) = target else {
            return Ok(None);
        };

        target.cancel.cancel();
        let last = target
            .handle
            .await
            .with_context(|| format!("Sync task for {}/{} panicked", symbol, network))?;

        let stopped = SyncCursor {
            syncing: false,
            ..last
        };
        let stored = self
            .cursors
            .upsert_cursor(&stopped)
            .with_context(|| format!("Failed to store cursor for {}", stopped.tag()))?;
        info!("{} Stopped at block {}", stored.tag(), stored.block_index);
        Ok(Some(stored))
    }

    /// Cancel all engines and wait for them to exit.
    ///
    /// Cursors keep their syncing flag so a restart resumes them.
    pub async fn shutdown(&self) -> Result<()> {
        let targets: Vec<(TargetKey, RunningTarget)> = self.lock()?.drain().collect();
        for (_, target) in &targets {
            target.cancel.cancel();
        }
        for ((symbol, network), target) in targets {
            if let Err(e) = target.handle.await {
                warn!("[{}/{}] Sync task ended abnormally: {:?}", symbol, network, e);
            }
        }
        Ok(())
    }

    /// Targets with a live engine, sorted.
    pub fn running(&self) -> Result<Vec<(String, String)>> {
        let targets = self.lock()?;
        let mut keys: Vec<TargetKey> = targets
            .iter()
            .filter(|(_, t)| !t.handle.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn spawn(
        &self,
        targets: &mut HashMap<TargetKey, RunningTarget>,
        cursor: SyncCursor,
    ) -> Result<()> {
        let reader = (self.readers)(&cursor.endpoint)
            .with_context(|| format!("Failed to create reader for {}", cursor.endpoint))?;
        let engine = SyncEngine::new(
            reader,
            self.cursors.clone(),
            self.watchlist.clone(),
            self.dispatcher.clone(),
        );

        let cancel = CancellationToken::new();
        let key = (cursor.symbol.clone(), cursor.network.clone());
        let handle = tokio::spawn(engine.run(cursor, cancel.clone()));
        targets.insert(key, RunningTarget { cancel, handle });
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TargetKey, RunningTarget>>> {
        self.targets
            .lock()
            .map_err(|_| anyhow::anyhow!("Sync registry lock poisoned"))
    }
}

fn is_running(targets: &HashMap<TargetKey, RunningTarget>, key: &TargetKey) -> bool {
    targets
        .get(key)
        .map_or(false, |t| !t.handle.is_finished())
}
