//! Chain reader abstraction
//!
//! The sync engine only needs three reads from a chain node. Retry and
//! backoff are not done here; the engine decides what a failure means.

use crate::types::{BlockInfo, TokenMetadata, Transaction};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Fetch a block by height.
    ///
    /// `Ok(None)` means the block has not been produced yet.
    async fn get_block(&self, height: u64) -> Result<Option<BlockInfo>>;

    /// Fetch a transaction by hash.
    async fn get_transaction(&self, hash: B256) -> Result<Transaction>;

    /// Resolve `name`, `symbol` and `decimals` of an ERC20 contract.
    async fn get_token_metadata(&self, contract: Address) -> Result<TokenMetadata>;
}
