//! Block sync engine
//!
//! One engine drives one (symbol, network) cursor. Each cycle fetches the
//! block at the cursor, classifies its transactions against the watchlist,
//! notifies the matching watch entries and persists the advanced cursor.
//! The cursor only moves past a block once every event of that block went
//! through the dispatcher, so blocks are processed at least once.

use crate::cache::TokenCache;
use crate::chain::ChainReader;
use crate::classify::{classify, decode_transfer, TransferEvent};
use crate::interval;
use crate::notify::{DeliveryReport, Dispatcher};
use crate::records::SyncCursor;
use crate::store::{CursorStore, WatchlistStore};
use crate::types::{BlockInfo, TokenMetadata, Transaction};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No block at the cursor yet, or the node could not serve it
    Miss,
    /// Block fully processed; the cursor moved past it
    Advanced { block: u64, events: usize },
    /// Classification or notification failed; delay increased, the block is fetched again
    Retry { block: u64 },
}

/// Cursor after a cycle, with the outcome that produced it.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub cursor: SyncCursor,
    pub outcome: CycleOutcome,
}

/// Sync engine for one target.
pub struct SyncEngine {
    reader: Arc<dyn ChainReader>,
    cursors: Arc<dyn CursorStore>,
    watchlist: Arc<dyn WatchlistStore>,
    dispatcher: Arc<Dispatcher>,
    tokens: TokenCache,
}

impl SyncEngine {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        cursors: Arc<dyn CursorStore>,
        watchlist: Arc<dyn WatchlistStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            reader,
            cursors,
            watchlist,
            dispatcher,
            tokens: TokenCache::new(),
        }
    }

    /// Run cycles until the cursor stops syncing or `cancel` fires.
    ///
    /// Returns the last in-memory cursor. A cycle in progress is finished
    /// before the loop observes cancellation; the inter-cycle sleep is not.
    pub async fn run(mut self, mut cursor: SyncCursor, cancel: CancellationToken) -> SyncCursor {
        let tag = cursor.tag();
        cursor.sync_delay = interval::clamp(cursor.sync_delay);
        info!(
            "{} Sync started at block {} via {} (delay {}ms)",
            tag, cursor.block_index, cursor.endpoint, cursor.sync_delay
        );

        while cursor.syncing && !cancel.is_cancelled() {
            let cycle = self.step(cursor).await;
            cursor = cycle.cursor;

            let delay = Duration::from_millis(cursor.sync_delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("{} Sync stopped at block {}", tag, cursor.block_index);
        cursor
    }

    /// Execute one cycle for `cursor`.
    pub async fn step(&mut self, cursor: SyncCursor) -> Cycle {
        let tag = cursor.tag();

        let block = match self.fetch(&cursor).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!("{} Block {} not available yet", tag, cursor.block_index);
                return self.miss(cursor);
            }
            Err(e) => {
                warn!(
                    "{} Failed to fetch block {}: {:?}",
                    tag, cursor.block_index, e
                );
                return self.miss(cursor);
            }
        };

        let height = block.number;
        match self.process(&cursor, &block).await {
            Ok(events) => {
                debug!(
                    "{} Completed block {} ({} transactions, {} events)",
                    tag,
                    height,
                    block.transactions.len(),
                    events
                );
                let next = SyncCursor {
                    // never move backwards, even if the node answers with a lower height
                    block_index: (height + 1).max(cursor.block_index),
                    sync_delay: interval::decrease(cursor.sync_delay),
                    ..cursor
                };
                Cycle {
                    cursor: self.persist(next),
                    outcome: CycleOutcome::Advanced {
                        block: height,
                        events,
                    },
                }
            }
            Err(e) => {
                warn!("{} Block {} will be retried: {:?}", tag, height, e);
                let next = SyncCursor {
                    sync_delay: interval::increase(cursor.sync_delay),
                    ..cursor
                };
                Cycle {
                    cursor: self.persist(next),
                    outcome: CycleOutcome::Retry { block: height },
                }
            }
        }
    }

    /// Fetch the block at the cursor. Height zero is treated as absent.
    async fn fetch(&self, cursor: &SyncCursor) -> Result<Option<BlockInfo>> {
        let block = self.reader.get_block(cursor.block_index).await?;
        Ok(block.filter(|b| b.number > 0))
    }

    fn miss(&self, cursor: SyncCursor) -> Cycle {
        let next = SyncCursor {
            sync_delay: interval::increase(cursor.sync_delay),
            ..cursor
        };
        Cycle {
            cursor: self.persist(next),
            outcome: CycleOutcome::Miss,
        }
    }

    async fn process(&mut self, cursor: &SyncCursor, block: &BlockInfo) -> Result<usize> {
        let events = self.classify_block(cursor, block).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let report = self.notify_events(cursor, &events).await?;
        info!(
            "{} Block {}: {} events, {} deliveries, {} failed, {} skipped",
            cursor.tag(),
            block.number,
            events.len(),
            report.delivered,
            report.failed,
            report.skipped
        );
        Ok(events.len())
    }

    /// Classify every transaction of `block` against the watched addresses.
    ///
    /// Fails when a transaction cannot be fetched. A transaction that cannot
    /// be decoded or whose token cannot be resolved is skipped.
    pub async fn classify_block(
        &mut self,
        cursor: &SyncCursor,
        block: &BlockInfo,
    ) -> Result<Vec<TransferEvent>> {
        let watched = self
            .watchlist
            .watched_addresses(&cursor.network)
            .context("Failed to load watched addresses")?;
        if watched.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for hash in &block.transactions {
            let tx = self
                .reader
                .get_transaction(*hash)
                .await
                .with_context(|| format!("Failed to fetch transaction {:?}", hash))?;

            match self.classify_transaction(cursor, &tx, &watched).await {
                Ok(mut found) => events.append(&mut found),
                Err(e) => warn!(
                    "{} Skipping transaction {:?} in block {}: {:?}",
                    cursor.tag(),
                    tx.hash,
                    block.number,
                    e
                ),
            }
        }
        Ok(events)
    }

    async fn classify_transaction(
        &mut self,
        cursor: &SyncCursor,
        tx: &Transaction,
        watched: &HashSet<String>,
    ) -> Result<Vec<TransferEvent>> {
        let Some(transfer) = decode_transfer(tx)? else {
            return Ok(Vec::new());
        };
        if !transfer.touches(watched) {
            return Ok(Vec::new());
        }

        let token = match transfer.token {
            Some(contract) => Some(self.token_metadata(contract).await?),
            None => None,
        };
        classify(
            &cursor.symbol,
            &cursor.network,
            tx,
            &transfer,
            token.as_ref(),
            watched,
        )
    }

    async fn token_metadata(&mut self, contract: Address) -> Result<TokenMetadata> {
        if let Some(meta) = self.tokens.get(contract) {
            return Ok(meta.clone());
        }
        let meta = self
            .reader
            .get_token_metadata(contract)
            .await
            .with_context(|| format!("Failed to resolve token {:?}", contract))?;
        self.tokens.insert(contract, meta.clone());
        Ok(meta)
    }

    /// Hand each event to the dispatcher with the entries watching it.
    ///
    /// Only a watchlist lookup failure is an error; delivery failures are
    /// counted in the report.
    pub async fn notify_events(
        &self,
        cursor: &SyncCursor,
        events: &[TransferEvent],
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        for event in events {
            let entries = self
                .watchlist
                .find_by_address(event.watched_address(), &cursor.network)
                .with_context(|| {
                    format!("Failed to look up watches for {}", event.watched_address())
                })?;
            let sent = self.dispatcher.notify(&entries, event).await;
            report.delivered += sent.delivered;
            report.failed += sent.failed;
            report.skipped += sent.skipped;
        }
        Ok(report)
    }

    /// Write the cursor; on failure keep going with the in-memory copy.
    fn persist(&self, cursor: SyncCursor) -> SyncCursor {
        match self.cursors.upsert_cursor(&cursor) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    "{} Failed to persist cursor at block {}: {:?}",
                    cursor.tag(),
                    cursor.block_index,
                    e
                );
                cursor
            }
        }
    }
}
