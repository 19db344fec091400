//! [`MetaStore`]: file versions, block routing and ring membership.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eddy_placement::HashRing;
use eddy_types::{BlockHash, FileMetaData, MigrationInstruction};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::MetaError;

type Result<T> = std::result::Result<T, MetaError>;

/// Upper bound on a single migration round trip issued by membership changes.
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Delivers a [`MigrationInstruction`] to a block store and waits for it to finish.
///
/// Returns the number of blocks the source moved. Any error means the
/// migration was not confirmed and the ring must not change.
#[async_trait]
pub trait MigrationDispatch: Send + Sync {
    /// Ask the block store at `source_addr` to move the instruction's range.
    async fn migrate_blocks(&self, source_addr: &str, inst: MigrationInstruction) -> Result<u64>;
}

/// The cluster's metadata authority.
///
/// The ring write lock is held across the whole of `add_node` / `remove_node`,
/// migration included, so membership changes are serialised and routing never
/// observes a ring whose blocks have not been moved yet.
pub struct MetaStore {
    files: RwLock<HashMap<String, FileMetaData>>,
    ring: RwLock<HashRing>,
    dispatch: Arc<dyn MigrationDispatch>,
    migration_timeout: Duration,
}

impl MetaStore {
    /// Create a metadata store seeded with `ring`.
    pub fn new(ring: HashRing, dispatch: Arc<dyn MigrationDispatch>) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            ring: RwLock::new(ring),
            dispatch,
            migration_timeout: DEFAULT_MIGRATION_TIMEOUT,
        }
    }

    /// Override the bound on each migration issued by membership changes.
    pub fn with_migration_timeout(mut self, timeout: Duration) -> Self {
        self.migration_timeout = timeout;
        self
    }

    // ----- Files -----

    /// Snapshot of every file's metadata.
    pub async fn get_file_info_map(&self) -> HashMap<String, FileMetaData> {
        self.files.read().await.clone()
    }

    /// Install `meta` if its version is exactly one past the stored version.
    ///
    /// A file that has never been written is at version 0. On success returns
    /// the new version; on mismatch returns [`MetaError::VersionConflict`]
    /// carrying the current version and leaves the map untouched.
    pub async fn update_file(&self, meta: FileMetaData) -> Result<u64> {
        let mut files = self.files.write().await;
        let current = files.get(&meta.filename).map_or(0, |m| m.version);

        if meta.version != current + 1 {
            debug!(
                filename = %meta.filename,
                proposed = meta.version,
                current,
                "rejected file update"
            );
            return Err(MetaError::VersionConflict {
                filename: meta.filename,
                proposed: meta.version,
                current,
            });
        }

        let version = meta.version;
        debug!(
            filename = %meta.filename,
            version,
            blocks = meta.block_hash_list.len(),
            "file updated"
        );
        files.insert(meta.filename.clone(), meta);
        Ok(version)
    }

    // ----- Routing -----

    /// Group `hashes` by the block store currently responsible for each.
    ///
    /// Every input hash appears exactly once across the returned lists.
    pub async fn get_block_store_map(
        &self,
        hashes: &[BlockHash],
    ) -> Result<HashMap<String, Vec<BlockHash>>> {
        let mut map: HashMap<String, Vec<BlockHash>> = HashMap::new();
        if hashes.is_empty() {
            return Ok(map);
        }

        let ring = self.ring.read().await;
        for hash in hashes {
            let owner = ring.find_block_owner(hash)?;
            map.entry(owner.addr.clone()).or_default().push(*hash);
        }
        Ok(map)
    }

    /// Copy of the current ring.
    pub async fn ring_snapshot(&self) -> HashRing {
        self.ring.read().await.clone()
    }

    // ----- Membership -----

    /// Add a block store to the ring, pulling its range from the old owner first.
    ///
    /// Returns `Ok(false)` if `addr` is already a member. The new ring is only
    /// installed once the old owner confirms the migration; on failure the
    /// ring is unchanged and the call can be retried.
    pub async fn add_node(&self, addr: &str) -> Result<bool> {
        let mut ring = self.ring.write().await;
        if ring.contains(addr) {
            debug!(addr, "node already on ring");
            return Ok(false);
        }

        let mut next = ring.clone();
        let node = next.add_node(addr);

        if !ring.is_empty() {
            let successor = ring.find_hosting_node(node.index)?.addr.clone();
            if let Some((lower_index, upper_index)) = next.owned_range(addr) {
                let inst = MigrationInstruction {
                    lower_index,
                    upper_index,
                    dest_addr: addr.to_string(),
                };
                let moved = self.dispatch_migration(&successor, inst).await?;
                info!(addr, from = %successor, moved, "migrated blocks to joining node");
            }
        }

        *ring = next;
        info!(addr, index = node.index, nodes = ring.len(), "node added to ring");
        Ok(true)
    }

    /// Remove a block store from the ring, draining all of its blocks to its successor.
    ///
    /// Returns `Ok(false)` if `addr` is not a member. Removing the only node
    /// fails with [`MetaError::LastNode`]. As with [`add_node`](Self::add_node),
    /// the ring only changes after the migration is confirmed.
    pub async fn remove_node(&self, addr: &str) -> Result<bool> {
        let mut ring = self.ring.write().await;
        if !ring.contains(addr) {
            debug!(addr, "node not on ring");
            return Ok(false);
        }
        if ring.len() == 1 {
            return Err(MetaError::LastNode(addr.to_string()));
        }

        let mut next = ring.clone();
        let Some(node) = next.remove_node(addr) else {
            return Ok(false);
        };
        let successor = next.find_hosting_node(node.index)?.addr.clone();

        if successor != addr {
            let inst = MigrationInstruction {
                lower_index: 0,
                upper_index: ring.ring_size() - 1,
                dest_addr: successor.clone(),
            };
            let moved = self.dispatch_migration(addr, inst).await?;
            info!(addr, to = %successor, moved, "drained leaving node");
        }

        *ring = next;
        info!(addr, nodes = ring.len(), "node removed from ring");
        Ok(true)
    }

    async fn dispatch_migration(&self, source: &str, inst: MigrationInstruction) -> Result<u64> {
        debug!(
            source,
            dest = %inst.dest_addr,
            lower = inst.lower_index,
            upper = inst.upper_index,
            "dispatching migration"
        );
        match tokio::time::timeout(
            self.migration_timeout,
            self.dispatch.migrate_blocks(source, inst),
        )
        .await
        {
            Ok(Ok(moved)) => Ok(moved),
            Ok(Err(e)) => {
                warn!(source, error = %e, "migration failed, ring unchanged");
                Err(e)
            }
            Err(_) => {
                warn!(source, timeout = ?self.migration_timeout, "migration timed out, ring unchanged");
                Err(MetaError::Migration {
                    source_addr: source.to_string(),
                    reason: format!("timed out after {:?}", self.migration_timeout),
                })
            }
        }
    }
}
