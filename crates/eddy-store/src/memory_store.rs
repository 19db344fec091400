//! In-memory block storage backend.

use std::collections::HashMap;
use std::sync::RwLock;

use eddy_types::{Block, BlockHash};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::BlockStore;

/// In-memory block store backed by a `RwLock<HashMap>`.
///
/// Blocks live for the lifetime of the process; nothing is persisted.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<BlockHash, Block>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().expect("lock poisoned").len()
    }

    /// Whether the store holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a reference to the inner map (for testing purposes).
    #[cfg(test)]
    pub(crate) fn inner(&self) -> &RwLock<HashMap<BlockHash, Block>> {
        &self.blocks
    }
}

#[async_trait::async_trait]
impl BlockStore for MemoryStore {
    async fn put(&self, hash: BlockHash, block: Block) -> Result<(), StoreError> {
        let mut map = self.blocks.write().expect("lock poisoned");
        debug!(%hash, size = block.size, "storing block in memory");
        map.insert(hash, block);
        Ok(())
    }

    async fn get(&self, hash: BlockHash) -> Result<Option<Block>, StoreError> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.get(&hash).cloned())
    }

    async fn delete(&self, hash: BlockHash) -> Result<(), StoreError> {
        let mut map = self.blocks.write().expect("lock poisoned");
        map.remove(&hash);
        debug!(%hash, "deleted block from memory");
        Ok(())
    }

    async fn contains(&self, hash: BlockHash) -> Result<bool, StoreError> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.contains_key(&hash))
    }

    async fn list(&self) -> Result<Vec<BlockHash>, StoreError> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.keys().copied().collect())
    }

    async fn snapshot(&self) -> Result<HashMap<BlockHash, Block>, StoreError> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.clone())
    }
}
