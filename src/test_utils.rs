//! Test doubles shared by the unit tests.

use crate::chain::ChainReader;
use crate::notify::{Mail, MailTransport, WebhookTransport};
use crate::records::{SyncCursor, WatchEntry, WatchRequest};
use crate::store::{CursorStore, RocksStore, WatchlistStore};
use crate::types::{BlockInfo, TokenMetadata, Transaction};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted chain reader.
#[derive(Default)]
pub struct MockChainReader {
    blocks: Mutex<HashMap<u64, BlockInfo>>,
    failing_blocks: Mutex<HashSet<u64>>,
    transactions: Mutex<HashMap<B256, Transaction>>,
    /// Remaining failures per transaction hash
    failing_transactions: Mutex<HashMap<B256, usize>>,
    tokens: Mutex<HashMap<Address, TokenMetadata>>,
    block_requests: Mutex<Vec<u64>>,
    token_requests: Mutex<Vec<Address>>,
}

impl MockChainReader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make block `number` available with the given transactions.
    pub fn add_block(&self, number: u64, txs: Vec<Transaction>) {
        let hashes = txs.iter().map(|tx| tx.hash).collect();
        let mut known = self.transactions.lock().unwrap();
        for tx in txs {
            known.insert(tx.hash, tx);
        }
        self.blocks.lock().unwrap().insert(
            number,
            BlockInfo {
                number,
                transactions: hashes,
            },
        );
    }

    /// Serve `block` when `height` is requested.
    pub fn add_block_at(&self, height: u64, block: BlockInfo) {
        self.blocks.lock().unwrap().insert(height, block);
    }

    pub fn fail_block(&self, height: u64) {
        self.failing_blocks.lock().unwrap().insert(height);
    }

    pub fn fail_transaction(&self, hash: B256, times: usize) {
        self.failing_transactions.lock().unwrap().insert(hash, times);
    }

    pub fn add_token(&self, contract: Address, metadata: TokenMetadata) {
        self.tokens.lock().unwrap().insert(contract, metadata);
    }

    pub fn block_requests(&self) -> Vec<u64> {
        self.block_requests.lock().unwrap().clone()
    }

    pub fn token_requests(&self) -> Vec<Address> {
        self.token_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn get_block(&self, height: u64) -> Result<Option<BlockInfo>> {
        self.block_requests.lock().unwrap().push(height);
        if self.failing_blocks.lock().unwrap().contains(&height) {
            anyhow::bail!("node unavailable");
        }
        Ok(self.blocks.lock().unwrap().get(&height).cloned())
    }

    async fn get_transaction(&self, hash: B256) -> Result<Transaction> {
        if let Some(remaining) = self.failing_transactions.lock().unwrap().get_mut(&hash) {
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("timeout fetching {:?}", hash);
            }
        }
        self.transactions
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown transaction {:?}", hash))
    }

    async fn get_token_metadata(&self, contract: Address) -> Result<TokenMetadata> {
        self.token_requests.lock().unwrap().push(contract);
        self.tokens
            .lock()
            .unwrap()
            .get(&contract)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("execution reverted"))
    }
}

/// Webhook transport that records every POST.
#[derive(Default)]
pub struct RecordingWebhook {
    posts: Mutex<Vec<(String, Value)>>,
    stall: Option<(String, Duration)>,
}

impl RecordingWebhook {
    /// Posts to `url` complete only after `delay`.
    pub fn stalling(url: &str, delay: Duration) -> Self {
        Self {
            posts: Mutex::default(),
            stall: Some((url.to_string(), delay)),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.posts.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.posts.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl WebhookTransport for RecordingWebhook {
    async fn post(&self, url: &str, body: &Value) -> Result<()> {
        if let Some((slow, delay)) = &self.stall {
            if slow == url {
                tokio::time::sleep(*delay).await;
            }
        }
        self.posts.lock().unwrap().push((url.to_string(), body.clone()));
        Ok(())
    }
}

/// Mail transport that records messages, or fails every send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Mail>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, mail: &Mail) -> Result<()> {
        if self.fail {
            anyhow::bail!("SMTP 554 rejected");
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Cursor store whose writes can be switched off.
pub struct FailingCursorStore {
    inner: Arc<RocksStore>,
    fail_writes: AtomicBool,
}

impl FailingCursorStore {
    pub fn new(inner: Arc<RocksStore>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }
}

impl CursorStore for FailingCursorStore {
    fn upsert_cursor(&self, cursor: &SyncCursor) -> Result<SyncCursor> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.upsert_cursor(cursor)
    }

    fn get_cursor(&self, symbol: &str, network: &str) -> Result<Option<SyncCursor>> {
        self.inner.get_cursor(symbol, network)
    }

    fn list_cursors_by_symbol(&self, symbol: &str) -> Result<Vec<SyncCursor>> {
        self.inner.list_cursors_by_symbol(symbol)
    }

    fn list_cursors(&self) -> Result<Vec<SyncCursor>> {
        self.inner.list_cursors()
    }
}

/// Watchlist whose address lookups fail a set number of times.
pub struct FlakyWatchlist {
    inner: Arc<RocksStore>,
    lookup_failures: AtomicUsize,
}

impl FlakyWatchlist {
    pub fn new(inner: Arc<RocksStore>, lookup_failures: usize) -> Self {
        Self {
            inner,
            lookup_failures: AtomicUsize::new(lookup_failures),
        }
    }
}

impl WatchlistStore for FlakyWatchlist {
    fn upsert_watch(&self, request: &WatchRequest) -> Result<WatchEntry> {
        self.inner.upsert_watch(request)
    }

    fn get_watch(&self, id: u64) -> Result<Option<WatchEntry>> {
        self.inner.get_watch(id)
    }

    fn find_by_task_id(&self, task_id: &str, network: &str) -> Result<Vec<WatchEntry>> {
        self.inner.find_by_task_id(task_id, network)
    }

    fn find_by_address(&self, address: &str, network: &str) -> Result<Vec<WatchEntry>> {
        let remaining = self.lookup_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.lookup_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("store unavailable");
        }
        self.inner.find_by_address(address, network)
    }

    fn delete_watch(&self, id: u64) -> Result<()> {
        self.inner.delete_watch(id)
    }

    fn watched_addresses(&self, network: &str) -> Result<HashSet<String>> {
        self.inner.watched_addresses(network)
    }
}

/// Watch entry for ETH/mainnet with the given callbacks.
pub fn watch_entry(
    id: u64,
    address: &str,
    callback_url: Option<&str>,
    callback_email: Option<&str>,
) -> WatchEntry {
    WatchEntry {
        id,
        task_id: format!("task-{}", id),
        symbol: "ETH".to_string(),
        network: "mainnet".to_string(),
        address: address.to_string(),
        callback_url: callback_url.map(str::to_string),
        callback_email: callback_email.map(str::to_string),
        created_at: 0,
        updated_at: 0,
    }
}
