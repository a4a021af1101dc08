//! Block storage backends
//!
//! A block is stored under `H(data)`. Storing the same bytes twice is a
//! no-op, so `put` is idempotent and blocks are immutable once stored.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::hash::ContentHash;

/// Statistics about a block store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of unique blocks stored
    pub count: u64,
    /// Total bytes stored
    pub total_bytes: u64,
}

/// Content-addressed storage used by the block service.
pub trait BlockBackend: Send + Sync {
    /// Look up a block by hash
    ///
    /// # Errors
    /// Returns an error only if the backend itself fails; absence is `Ok(None)`
    fn get(&self, hash: &ContentHash) -> color_eyre::Result<Option<Bytes>>;

    /// Store `data` under its hash and return that hash
    ///
    /// # Errors
    /// Returns an error if the backend cannot persist the block
    fn put(&self, data: Bytes) -> color_eyre::Result<ContentHash>;

    /// Subset of `hashes` that are present, in input order
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read
    fn has_blocks(&self, hashes: &[ContentHash]) -> color_eyre::Result<Vec<ContentHash>>;

    /// Count and size of stored blocks
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read
    fn stats(&self) -> color_eyre::Result<StoreStats>;
}

/// In-memory block store guarded by a read/write lock.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<ContentHash, Bytes>>,
}

impl MemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockBackend for MemoryBlockStore {
    fn get(&self, hash: &ContentHash) -> color_eyre::Result<Option<Bytes>> {
        Ok(self.blocks.read().get(hash).cloned())
    }

    fn put(&self, data: Bytes) -> color_eyre::Result<ContentHash> {
        let hash = ContentHash::from_bytes(&data);
        self.blocks.write().entry(hash).or_insert(data);
        Ok(hash)
    }

    fn has_blocks(&self, hashes: &[ContentHash]) -> color_eyre::Result<Vec<ContentHash>> {
        let blocks = self.blocks.read();
        Ok(hashes
            .iter()
            .filter(|h| blocks.contains_key(h))
            .copied()
            .collect())
    }

    fn stats(&self) -> color_eyre::Result<StoreStats> {
        let blocks = self.blocks.read();
        Ok(StoreStats {
            count: blocks.len() as u64,
            total_bytes: blocks.values().map(|b| b.len() as u64).sum(),
        })
    }
}
