//! Core traits for block storage and block transfer.

use std::collections::HashMap;

use eddy_types::{Block, BlockHash};

use crate::error::StoreError;

/// Trait for storing and retrieving content-addressed blocks on one node.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Callers are responsible for passing the correct hash for each block.
#[async_trait::async_trait]
pub trait BlockStore: Send + Sync {
    /// Store a block under the given hash. Storing the same block again is a no-op.
    async fn put(&self, hash: BlockHash, block: Block) -> Result<(), StoreError>;

    /// Retrieve a block by hash. Returns `None` if not found.
    async fn get(&self, hash: BlockHash) -> Result<Option<Block>, StoreError>;

    /// Delete a block by hash.
    async fn delete(&self, hash: BlockHash) -> Result<(), StoreError>;

    /// Check whether a block exists.
    async fn contains(&self, hash: BlockHash) -> Result<bool, StoreError>;

    /// List all stored block hashes.
    async fn list(&self) -> Result<Vec<BlockHash>, StoreError>;

    /// Copy of every stored block, keyed by hash.
    async fn snapshot(&self) -> Result<HashMap<BlockHash, Block>, StoreError>;
}

/// Abstracts delivery of a block to another block store.
///
/// An `Ok(())` means the destination acknowledged storing the block; only
/// then may the sender drop its own copy.
#[async_trait::async_trait]
pub trait BlockTransfer: Send + Sync {
    /// Put `block` on the block store at `addr`.
    async fn put_block(&self, addr: &str, block: Block) -> Result<(), StoreError>;
}
