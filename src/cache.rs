//! Token metadata cache
//!
//! In-memory cache to avoid repeated `name()`/`symbol()`/`decimals()` calls
//! for the same ERC20 contract. Token metadata does not change once deployed,
//! so entries are cached for the life of the engine. Failed lookups are not
//! cached and will be retried the next time the token shows up.

use crate::types::TokenMetadata;
use alloy_primitives::Address;
use std::collections::HashMap;

/// Cache of resolved token metadata, keyed by contract address.
pub struct TokenCache {
    cache: HashMap<Address, TokenMetadata>,
}

impl TokenCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Look up a contract's metadata.
    pub fn get(&self, contract: Address) -> Option<&TokenMetadata> {
        self.cache.get(&contract)
    }

    /// Remember a contract's metadata.
    pub fn insert(&mut self, contract: Address, metadata: TokenMetadata) {
        self.cache.insert(contract, metadata);
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
