//! Protocol messages for the Eddy RPC layer.
//!
//! Every request gets exactly one response on the same connection. Both are
//! sent as length-prefixed postcard payloads (see [`crate::transport`]).

use std::collections::HashMap;

use eddy_meta::MetaError;
use eddy_placement::HashRing;
use eddy_store::StoreError;
use eddy_types::{Block, BlockHash, FileMetaData, MigrationInstruction};
use serde::{Deserialize, Serialize};

/// Requests accepted by an Eddy server.
///
/// Metadata requests need a server hosting a `MetaStore`; block requests
/// need one hosting a `BlockStoreService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EddyRequest {
    /// Liveness check, answered by any server.
    Ping,

    // ----- Metadata service -----
    /// Fetch every file's metadata.
    GetFileInfoMap,
    /// Propose a new version of a file.
    UpdateFile(FileMetaData),
    /// Route block hashes to the block stores responsible for them.
    GetBlockStoreMap(Vec<BlockHash>),
    /// Fetch the current ring.
    GetRing,
    /// Add a block store to the ring.
    AddNode {
        /// Block store address (`host:port`).
        addr: String,
    },
    /// Remove a block store from the ring.
    RemoveNode {
        /// Block store address (`host:port`).
        addr: String,
    },

    // ----- Block service -----
    /// Fetch one block.
    GetBlock(BlockHash),
    /// Store one block under its content hash.
    PutBlock(Block),
    /// Which of these hashes does the store hold?
    HasBlocks(Vec<BlockHash>),
    /// Fetch every stored block.
    GetBlockMap,
    /// Move a ring range to another block store.
    MigrateBlocks(MigrationInstruction),
}

impl EddyRequest {
    /// Whether re-sending this request after a lost response is harmless.
    ///
    /// `UpdateFile` is the only request that is not: a retried update that
    /// already landed would come back as a version conflict.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, Self::UpdateFile(_))
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetFileInfoMap => "get_file_info_map",
            Self::UpdateFile(_) => "update_file",
            Self::GetBlockStoreMap(_) => "get_block_store_map",
            Self::GetRing => "get_ring",
            Self::AddNode { .. } => "add_node",
            Self::RemoveNode { .. } => "remove_node",
            Self::GetBlock(_) => "get_block",
            Self::PutBlock(_) => "put_block",
            Self::HasBlocks(_) => "has_blocks",
            Self::GetBlockMap => "get_block_map",
            Self::MigrateBlocks(_) => "migrate_blocks",
        }
    }
}

/// Responses sent by an Eddy server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EddyResponse {
    /// Answer to [`EddyRequest::Ping`].
    Pong,
    /// Every file's metadata.
    FileInfoMap(HashMap<String, FileMetaData>),
    /// The version now stored for an updated file.
    Version(u64),
    /// Block hashes grouped by responsible block store.
    BlockStoreMap(HashMap<String, Vec<BlockHash>>),
    /// The current ring.
    Ring(HashRing),
    /// Whether a membership change altered the ring.
    Membership(bool),
    /// The requested block, or `None` if this store does not hold it.
    Block(Option<Block>),
    /// Acknowledgement that a block is durably held.
    Stored(bool),
    /// Subset of queried hashes that are present.
    BlockHashes(Vec<BlockHash>),
    /// Every stored block.
    BlockMap(HashMap<BlockHash, Block>),
    /// Number of blocks moved by a completed migration.
    Migrated(u64),
    /// The request failed.
    Error(RpcError),
}

/// Errors carried back to the caller in [`EddyResponse::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RpcError {
    /// The proposed file version was not `current + 1`.
    #[error("version conflict: current version is {current}")]
    VersionConflict {
        /// Authoritative current version.
        current: u64,
    },

    /// Ring placement failed (e.g. the ring is empty).
    #[error("ring error: {0}")]
    Ring(String),

    /// The last node on the ring cannot be removed.
    #[error("cannot remove last node {0}")]
    LastNode(String),

    /// A membership change could not migrate blocks; the ring is unchanged.
    #[error("migration from {source_addr} failed: {reason}")]
    Migration {
        /// Block store asked to migrate.
        source_addr: String,
        /// Underlying failure.
        reason: String,
    },

    /// A migration moved only part of the range; safe to retry.
    #[error("partial migration to {dest}: {moved} moved, {} failed", .failed.len())]
    PartialMigration {
        /// Destination address.
        dest: String,
        /// Blocks delivered.
        moved: u64,
        /// Blocks still held by the source.
        failed: Vec<BlockHash>,
    },

    /// This server does not host the service the request needs.
    #[error("unsupported request: {0}")]
    Unsupported(String),

    /// Any other server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MetaError> for RpcError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::VersionConflict { current, .. } => Self::VersionConflict { current },
            MetaError::Ring(e) => Self::Ring(e.to_string()),
            MetaError::LastNode(addr) => Self::LastNode(addr),
            MetaError::Migration {
                source_addr,
                reason,
            } => Self::Migration {
                source_addr,
                reason,
            },
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PartialMigration {
                dest,
                moved,
                failed,
            } => Self::PartialMigration {
                dest,
                moved,
                failed,
            },
            StoreError::Ring(e) => Self::Ring(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
