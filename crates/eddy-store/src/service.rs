//! [`BlockStoreService`]: the per-node block store RPC contract.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use eddy_placement::hash_mod;
use eddy_types::{Block, BlockHash, MigrationInstruction, RingIndex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::traits::{BlockStore, BlockTransfer};

/// Outcome of a fully successful migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Destination address.
    pub dest: String,
    /// Number of blocks delivered and removed locally.
    pub moved: u64,
}

/// Content-addressed block storage for one node, plus migration to peers.
///
/// Migrations on the same node are serialised; reads and puts are not
/// blocked by an in-flight migration.
pub struct BlockStoreService {
    store: Arc<dyn BlockStore>,
    transfer: Arc<dyn BlockTransfer>,
    ring_size: u64,
    /// This node's own address, if known. Migrations targeting it are skipped.
    local_addr: Option<String>,
    migration_lock: Mutex<()>,
}

impl BlockStoreService {
    /// Create a service over `store`, sending migrated blocks via `transfer`.
    pub fn new(
        store: Arc<dyn BlockStore>,
        transfer: Arc<dyn BlockTransfer>,
        ring_size: u64,
    ) -> Result<Self, StoreError> {
        // Validate the ring size once so later reductions cannot fail.
        hash_mod(&[], ring_size)?;
        Ok(Self {
            store,
            transfer,
            ring_size,
            local_addr: None,
            migration_lock: Mutex::new(()),
        })
    }

    /// Record this node's own address.
    pub fn with_local_addr(mut self, addr: impl Into<String>) -> Self {
        self.local_addr = Some(addr.into());
        self
    }

    /// Ring size used to place blocks during migration.
    pub fn ring_size(&self) -> u64 {
        self.ring_size
    }

    /// Ring position of a block on this node's ring.
    pub fn block_index(&self, hash: &BlockHash) -> RingIndex {
        hash_mod(hash.as_bytes(), self.ring_size).unwrap_or_default()
    }

    /// Fetch a block. `None` means this node does not hold it.
    pub async fn get_block(&self, hash: BlockHash) -> Result<Option<Block>, StoreError> {
        let block = self.store.get(hash).await?;
        if block.is_none() {
            debug!(%hash, "block not found");
        }
        Ok(block)
    }

    /// Store a block under the hash of its contents.
    pub async fn put_block(&self, block: Block) -> Result<bool, StoreError> {
        let hash = block.hash();
        self.store.put(hash, block).await?;
        Ok(true)
    }

    /// The subset of `hashes` held locally, without duplicates.
    pub async fn has_blocks(&self, hashes: &[BlockHash]) -> Result<Vec<BlockHash>, StoreError> {
        let mut seen = HashSet::with_capacity(hashes.len());
        let mut present = Vec::new();
        for hash in hashes {
            if seen.insert(*hash) && self.store.contains(*hash).await? {
                present.push(*hash);
            }
        }
        Ok(present)
    }

    /// Every block held locally (debugging aid).
    pub async fn get_block_map(&self) -> Result<HashMap<BlockHash, Block>, StoreError> {
        self.store.snapshot().await
    }

    /// Move every local block whose ring index falls in the instruction's
    /// range to `inst.dest_addr`.
    ///
    /// Each block is deleted locally only after the destination acknowledges
    /// it. Blocks that cannot be delivered stay here and are reported in
    /// [`StoreError::PartialMigration`]; re-sending the same instruction
    /// retries exactly those blocks.
    pub async fn migrate_blocks(
        &self,
        inst: &MigrationInstruction,
    ) -> Result<MigrationReport, StoreError> {
        let _guard = self.migration_lock.lock().await;

        if self.local_addr.as_deref() == Some(inst.dest_addr.as_str()) {
            debug!(dest = %inst.dest_addr, "migration target is this node, nothing to move");
            return Ok(MigrationReport {
                dest: inst.dest_addr.clone(),
                moved: 0,
            });
        }

        let candidates: Vec<BlockHash> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|hash| inst.covers(self.block_index(hash)))
            .collect();

        info!(
            dest = %inst.dest_addr,
            lower = inst.lower_index,
            upper = inst.upper_index,
            blocks = candidates.len(),
            "migrating blocks"
        );

        let mut moved = 0u64;
        let mut failed = Vec::new();

        for hash in candidates {
            // A concurrent migration may already have moved it.
            let Some(block) = self.store.get(hash).await? else {
                continue;
            };

            match self.transfer.put_block(&inst.dest_addr, block).await {
                Ok(()) => {
                    self.store.delete(hash).await?;
                    moved += 1;
                    debug!(%hash, dest = %inst.dest_addr, "migrated block");
                }
                Err(e) => {
                    warn!(%hash, dest = %inst.dest_addr, error = %e, "block transfer failed, keeping local copy");
                    failed.push(hash);
                }
            }
        }

        if !failed.is_empty() {
            return Err(StoreError::PartialMigration {
                dest: inst.dest_addr.clone(),
                moved,
                failed,
            });
        }

        info!(dest = %inst.dest_addr, moved, "migration complete");
        Ok(MigrationReport {
            dest: inst.dest_addr.clone(),
            moved,
        })
    }
}
