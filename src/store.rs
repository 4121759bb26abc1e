//! Cursor and watchlist stores, with a RocksDB implementation
//!
//! Provides persistent storage for sync cursors and watch entries.
//! Uses RocksDB with column families for efficient organization.

use crate::keys::{
    address_index_prefix, check_part, cursor_prefix, cursor_symbol_prefix, decode_index_address,
    decode_index_id, encode_address_index_key, encode_cursor_key, encode_meta_key,
    encode_task_index_key, encode_watch_identity_key, encode_watch_key, network_index_prefix,
    task_index_prefix,
};
use crate::records::{normalize_address, now_millis, SyncCursor, WatchEntry, WatchRequest};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

const CF_CURSORS: &str = "cursors";
const CF_WATCHES: &str = "watches";
const CF_WATCH_IDS: &str = "watch_ids";
const CF_WATCH_BY_ADDRESS: &str = "watch_by_address";
const CF_WATCH_BY_TASK: &str = "watch_by_task";
const CF_META: &str = "meta";

const META_NEXT_WATCH_ID: u8 = 0x01;

/// Durable mapping from (symbol, network) to sync position.
///
/// Each key is driven by exactly one engine, so last write wins.
pub trait CursorStore: Send + Sync {
    /// Create or replace the cursor for (cursor.symbol, cursor.network).
    ///
    /// Preserves `created_at` of an existing record and stamps `updated_at`.
    fn upsert_cursor(&self, cursor: &SyncCursor) -> Result<SyncCursor>;

    /// Get the cursor for (symbol, network).
    fn get_cursor(&self, symbol: &str, network: &str) -> Result<Option<SyncCursor>>;

    /// All cursors of one symbol, ordered by network.
    fn list_cursors_by_symbol(&self, symbol: &str) -> Result<Vec<SyncCursor>>;

    /// Every cursor in the store.
    fn list_cursors(&self) -> Result<Vec<SyncCursor>>;
}

/// Durable set of watch entries.
///
/// Addresses are stored lower-cased and compared case-insensitively.
pub trait WatchlistStore: Send + Sync {
    /// Create or update a watch entry keyed by (task_id, symbol, network, address).
    fn upsert_watch(&self, request: &WatchRequest) -> Result<WatchEntry>;

    /// Get a watch entry by id.
    fn get_watch(&self, id: u64) -> Result<Option<WatchEntry>>;

    /// Entries registered by a task on a network.
    fn find_by_task_id(&self, task_id: &str, network: &str) -> Result<Vec<WatchEntry>>;

    /// Entries watching an address on a network.
    fn find_by_address(&self, address: &str, network: &str) -> Result<Vec<WatchEntry>>;

    /// Delete an entry. Deleting a missing id is not an error.
    fn delete_watch(&self, id: u64) -> Result<()>;

    /// Distinct watched addresses on a network.
    fn watched_addresses(&self, network: &str) -> Result<HashSet<String>>;
}

/// RocksDB-backed implementation of both stores.
///
/// Column families:
/// - cursors: SyncCursor by (symbol, network)
/// - watches: WatchEntry by id
/// - watch_ids: identity key -> id
/// - watch_by_address: (network, address, id) index
/// - watch_by_task: (task_id, network, id) index
/// - meta: id counter
pub struct RocksStore {
    db: DB,
    /// Serializes watch upserts/deletes (id allocation and index updates).
    watch_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_CURSORS, Options::default()),
            ColumnFamilyDescriptor::new(CF_WATCHES, Options::default()),
            ColumnFamilyDescriptor::new(CF_WATCH_IDS, Options::default()),
            ColumnFamilyDescriptor::new(CF_WATCH_BY_ADDRESS, Options::default()),
            ColumnFamilyDescriptor::new(CF_WATCH_BY_TASK, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self {
            db,
            watch_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    /// Collect (key, value) pairs whose key starts with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.get_cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    /// Load watch entries for the ids found under an index prefix.
    fn entries_for_index(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<WatchEntry>> {
        let mut entries = Vec::new();
        for (key, _) in self.scan_prefix(cf_name, prefix)? {
            let id = decode_index_id(&key).context("Failed to decode index key")?;
            match self.get_watch(id)? {
                Some(entry) => entries.push(entry),
                None => tracing::warn!("Dangling {} index entry for watch id {}", cf_name, id),
            }
        }
        Ok(entries)
    }

    fn next_watch_id(&self) -> Result<u64> {
        let cf = self.get_cf(CF_META)?;
        let key = encode_meta_key(META_NEXT_WATCH_ID);
        match self.db.get_cf(cf, &key).context("Failed to get watch id counter")? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("Watch id counter must be 8 bytes"))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(1),
        }
    }

    fn lock_watches(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.watch_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Watchlist lock poisoned"))
    }
}

fn decode_cursor(bytes: &[u8]) -> Result<SyncCursor> {
    postcard::from_bytes(bytes).context("Failed to deserialize cursor")
}

impl CursorStore for RocksStore {
    fn upsert_cursor(&self, cursor: &SyncCursor) -> Result<SyncCursor> {
        check_part("symbol", &cursor.symbol)?;
        check_part("network", &cursor.network)?;

        let now = now_millis();
        let created_at = match self.get_cursor(&cursor.symbol, &cursor.network)? {
            Some(existing) => existing.created_at,
            None => now,
        };
        let record = SyncCursor {
            created_at,
            updated_at: now,
            ..cursor.clone()
        };

        let cf = self.get_cf(CF_CURSORS)?;
        let key = encode_cursor_key(&record.symbol, &record.network);
        let value = postcard::to_allocvec(&record).context("Failed to serialize cursor")?;
        self.db
            .put_cf(cf, &key, &value)
            .context("Failed to put cursor")?;
        Ok(record)
    }

    fn get_cursor(&self, symbol: &str, network: &str) -> Result<Option<SyncCursor>> {
        let cf = self.get_cf(CF_CURSORS)?;
        let key = encode_cursor_key(symbol, network);
        match self.db.get_cf(cf, &key).context("Failed to get cursor")? {
            Some(bytes) => Ok(Some(decode_cursor(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_cursors_by_symbol(&self, symbol: &str) -> Result<Vec<SyncCursor>> {
        self.scan_prefix(CF_CURSORS, &cursor_symbol_prefix(symbol))?
            .iter()
            .map(|(_, value)| decode_cursor(value))
            .collect()
    }

    fn list_cursors(&self) -> Result<Vec<SyncCursor>> {
        self.scan_prefix(CF_CURSORS, &cursor_prefix())?
            .iter()
            .map(|(_, value)| decode_cursor(value))
            .collect()
    }
}

impl WatchlistStore for RocksStore {
    fn upsert_watch(&self, request: &WatchRequest) -> Result<WatchEntry> {
        let address = normalize_address(&request.address);
        check_part("task_id", &request.task_id)?;
        check_part("symbol", &request.symbol)?;
        check_part("network", &request.network)?;
        check_part("address", &address)?;

        let _guard = self.lock_watches()?;
        let now = now_millis();

        let ids_cf = self.get_cf(CF_WATCH_IDS)?;
        let identity = encode_watch_identity_key(
            &request.task_id,
            &request.symbol,
            &request.network,
            &address,
        );
        let existing_id = self
            .db
            .get_cf(ids_cf, &identity)
            .context("Failed to get watch identity")?
            .map(|bytes| -> Result<u64> {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("Watch id must be 8 bytes"))?;
                Ok(u64::from_be_bytes(bytes))
            })
            .transpose()?;

        let mut batch = WriteBatch::default();
        let (id, created_at) = match existing_id {
            Some(id) => {
                let created_at = self.get_watch(id)?.map(|e| e.created_at).unwrap_or(now);
                (id, created_at)
            }
            None => {
                let id = self.next_watch_id()?;
                batch.put_cf(
                    self.get_cf(CF_META)?,
                    encode_meta_key(META_NEXT_WATCH_ID),
                    (id + 1).to_be_bytes(),
                );
                (id, now)
            }
        };

        let entry = WatchEntry {
            id,
            task_id: request.task_id.clone(),
            symbol: request.symbol.clone(),
            network: request.network.clone(),
            address,
            callback_url: request.callback_url.clone(),
            callback_email: request.callback_email.clone(),
            created_at,
            updated_at: now,
        };
        let value = postcard::to_allocvec(&entry).context("Failed to serialize watch entry")?;

        batch.put_cf(self.get_cf(CF_WATCHES)?, encode_watch_key(id), value);
        batch.put_cf(ids_cf, identity, id.to_be_bytes());
        batch.put_cf(
            self.get_cf(CF_WATCH_BY_ADDRESS)?,
            encode_address_index_key(&entry.network, &entry.address, id),
            b"",
        );
        batch.put_cf(
            self.get_cf(CF_WATCH_BY_TASK)?,
            encode_task_index_key(&entry.task_id, &entry.network, id),
            b"",
        );
        self.db.write(batch).context("Failed to write watch entry")?;

        Ok(entry)
    }

    fn get_watch(&self, id: u64) -> Result<Option<WatchEntry>> {
        let cf = self.get_cf(CF_WATCHES)?;
        match self
            .db
            .get_cf(cf, encode_watch_key(id))
            .context("Failed to get watch entry")?
        {
            Some(bytes) => {
                let entry = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize watch entry")?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn find_by_task_id(&self, task_id: &str, network: &str) -> Result<Vec<WatchEntry>> {
        self.entries_for_index(CF_WATCH_BY_TASK, &task_index_prefix(task_id, network))
    }

    fn find_by_address(&self, address: &str, network: &str) -> Result<Vec<WatchEntry>> {
        let address = normalize_address(address);
        self.entries_for_index(CF_WATCH_BY_ADDRESS, &address_index_prefix(network, &address))
    }

    fn delete_watch(&self, id: u64) -> Result<()> {
        let _guard = self.lock_watches()?;
        let entry = match self.get_watch(id)? {
            Some(entry) => entry,
            None => return Ok(()),
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.get_cf(CF_WATCHES)?, encode_watch_key(id));
        batch.delete_cf(
            self.get_cf(CF_WATCH_IDS)?,
            encode_watch_identity_key(&entry.task_id, &entry.symbol, &entry.network, &entry.address),
        );
        batch.delete_cf(
            self.get_cf(CF_WATCH_BY_ADDRESS)?,
            encode_address_index_key(&entry.network, &entry.address, id),
        );
        batch.delete_cf(
            self.get_cf(CF_WATCH_BY_TASK)?,
            encode_task_index_key(&entry.task_id, &entry.network, id),
        );
        self.db.write(batch).context("Failed to delete watch entry")?;
        Ok(())
    }

    fn watched_addresses(&self, network: &str) -> Result<HashSet<String>> {
        let mut addresses = HashSet::new();
        for (key, _) in self.scan_prefix(CF_WATCH_BY_ADDRESS, &network_index_prefix(network))? {
            addresses.insert(decode_index_address(&key).context("Failed to decode index key")?);
        }
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn watch(task: &str, network: &str, address: &str) -> WatchRequest {
        WatchRequest {
            task_id: task.to_string(),
            symbol: "ETH".to_string(),
            network: network.to_string(),
            address: address.to_string(),
            callback_url: Some("http://hooks.local/a".to_string()),
            callback_email: None,
        }
    }

    #[test]
    fn test_missing_cursor_returns_none() {
        let (store, _temp_dir) = create_test_store();
        assert_eq!(store.get_cursor("ETH", "mainnet").unwrap(), None);
    }

    #[test]
    fn test_cursor_upsert_is_idempotent() {
        let (store, _temp_dir) = create_test_store();
        let cursor = SyncCursor::new("ETH", "mainnet", "http://node", 500, 1000);

        store.upsert_cursor(&cursor).unwrap();
        store.upsert_cursor(&cursor).unwrap();

        let all = store.list_cursors().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].block_index, 500);
        assert_eq!(all[0].sync_delay, 1000);
        assert_eq!(all[0].endpoint, "http://node");
        assert!(all[0].syncing);
    }

    #[test]
    fn test_cursor_upsert_keeps_created_at() {
        let (store, _temp_dir) = create_test_store();
        let mut cursor = SyncCursor::new("ETH", "mainnet", "http://node", 1, 0);
        let first = store.upsert_cursor(&cursor).unwrap();

        cursor.block_index = 2;
        let second = store.upsert_cursor(&cursor).unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.get_cursor("ETH", "mainnet").unwrap().unwrap().block_index, 2);
    }

    #[test]
    fn test_list_cursors_by_symbol() {
        let (store, _temp_dir) = create_test_store();
        store.upsert_cursor(&SyncCursor::new("ETH", "mainnet", "a", 1, 0)).unwrap();
        store.upsert_cursor(&SyncCursor::new("ETH", "ropsten", "b", 2, 0)).unwrap();
        store.upsert_cursor(&SyncCursor::new("ETHW", "mainnet", "c", 3, 0)).unwrap();
        store.upsert_cursor(&SyncCursor::new("BNB", "mainnet", "d", 4, 0)).unwrap();

        let eth = store.list_cursors_by_symbol("ETH").unwrap();
        let networks: Vec<&str> = eth.iter().map(|c| c.network.as_str()).collect();
        assert_eq!(networks, vec!["mainnet", "ropsten"]);
        assert_eq!(store.list_cursors().unwrap().len(), 4);
    }

    #[test]
    fn test_cursor_rejects_empty_symbol() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.upsert_cursor(&SyncCursor::new("", "mainnet", "a", 1, 0)).is_err());
    }

    #[test]
    fn test_watch_upsert_replaces_callbacks() {
        let (store, _temp_dir) = create_test_store();
        let first = store.upsert_watch(&watch("t1", "mainnet", "0xABC")).unwrap();

        let mut update = watch("t1", "mainnet", "0xabc");
        update.callback_url = None;
        update.callback_email = Some("ops@example.com".to_string());
        let second = store.upsert_watch(&update).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.address, "0xabc");

        let found = store.find_by_address("0xabc", "mainnet").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].callback_url, None);
        assert_eq!(found[0].callback_email.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn test_find_by_address_is_case_insensitive() {
        let (store, _temp_dir) = create_test_store();
        store.upsert_watch(&watch("t1", "mainnet", "0xabc")).unwrap();

        assert_eq!(store.find_by_address("0XABC", "mainnet").unwrap().len(), 1);
        assert!(store.find_by_address("0xabc", "ropsten").unwrap().is_empty());
        assert!(store.find_by_address("0xab", "mainnet").unwrap().is_empty());
    }

    #[test]
    fn test_find_by_task_id() {
        let (store, _temp_dir) = create_test_store();
        store.upsert_watch(&watch("t1", "mainnet", "0x01")).unwrap();
        store.upsert_watch(&watch("t1", "mainnet", "0x02")).unwrap();
        store.upsert_watch(&watch("t1", "ropsten", "0x03")).unwrap();
        store.upsert_watch(&watch("t2", "mainnet", "0x01")).unwrap();

        let t1 = store.find_by_task_id("t1", "mainnet").unwrap();
        assert_eq!(t1.len(), 2);
        assert!(t1.iter().all(|e| e.task_id == "t1" && e.network == "mainnet"));

        // Two tasks watching the same address both match
        assert_eq!(store.find_by_address("0x01", "mainnet").unwrap().len(), 2);
    }

    #[test]
    fn test_delete_watch() {
        let (store, _temp_dir) = create_test_store();
        let entry = store.upsert_watch(&watch("t1", "mainnet", "0xabc")).unwrap();

        store.delete_watch(entry.id).unwrap();
        assert!(store.get_watch(entry.id).unwrap().is_none());
        assert!(store.find_by_address("0xabc", "mainnet").unwrap().is_empty());
        assert!(store.find_by_task_id("t1", "mainnet").unwrap().is_empty());
        assert!(store.watched_addresses("mainnet").unwrap().is_empty());

        // Idempotent
        store.delete_watch(entry.id).unwrap();
        store.delete_watch(9999).unwrap();

        // Re-registering after delete gets a fresh id
        let again = store.upsert_watch(&watch("t1", "mainnet", "0xabc")).unwrap();
        assert_ne!(again.id, entry.id);
    }

    #[test]
    fn test_watched_addresses() {
        let (store, _temp_dir) = create_test_store();
        store.upsert_watch(&watch("t1", "mainnet", "0xAA")).unwrap();
        store.upsert_watch(&watch("t2", "mainnet", "0xaa")).unwrap();
        store.upsert_watch(&watch("t1", "mainnet", "0xbb")).unwrap();
        store.upsert_watch(&watch("t1", "ropsten", "0xcc")).unwrap();

        let addresses = store.watched_addresses("mainnet").unwrap();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains("0xaa"));
        assert!(addresses.contains("0xbb"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.upsert_cursor(&SyncCursor::new("ETH", "mainnet", "a", 500, 0)).unwrap();
            store.upsert_watch(&watch("t1", "mainnet", "0xabc")).unwrap();
        }
        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get_cursor("ETH", "mainnet").unwrap().unwrap().block_index, 500);
        assert_eq!(store.find_by_address("0xabc", "mainnet").unwrap().len(), 1);
        let next = store.upsert_watch(&watch("t1", "mainnet", "0xdef")).unwrap();
        assert_eq!(next.id, 2);
    }
}
