//! chainwatch - block sync and watchlist notifications
//!
//! Follows EVM chains block by block, matches native and ERC20 transfers
//! against a persisted watchlist and notifies subscribers by webhook or
//! email. Sync positions are persisted per (symbol, network) so a restart
//! resumes where it left off.

pub mod interval;
pub mod keys;
pub mod records;
pub mod store;
pub mod cli;

// Sync modules
pub mod cache;
pub mod chain;
pub mod classify;
pub mod config;
pub mod engine;
pub mod notify;
pub mod registry;
pub mod rpc;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Re-export the main types for convenience
pub use engine::{CycleOutcome, SyncEngine};
pub use records::{SyncCursor, WatchEntry, WatchRequest};
pub use registry::{StartSync, SyncRegistry};
pub use store::{CursorStore, RocksStore, WatchlistStore};
