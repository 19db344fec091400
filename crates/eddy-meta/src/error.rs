//! Error types for the metadata store.

use eddy_placement::RingError;

/// Errors returned by [`MetaStore`](crate::MetaStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// The proposed version is not exactly one past the stored version.
    #[error(
        "version conflict for {filename:?}: proposed {proposed}, expected {}, current {current}",
        .current + 1
    )]
    VersionConflict {
        /// File being updated.
        filename: String,
        /// Version the caller proposed.
        proposed: u64,
        /// Authoritative current version.
        current: u64,
    },

    /// Ring placement failed, e.g. routing on an empty ring.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Migrating blocks off `source` failed; the ring was left unchanged.
    #[error("migration from {source_addr} failed: {reason}")]
    Migration {
        /// Block store that was asked to migrate.
        source_addr: String,
        /// Underlying failure.
        reason: String,
    },

    /// The only node on the ring cannot leave: no successor would take its blocks.
    #[error("cannot remove {0}: it is the last node on the ring")]
    LastNode(String),
}

impl MetaError {
    /// The authoritative version reported by a version conflict.
    pub fn current_version(&self) -> Option<u64> {
        match self {
            Self::VersionConflict { current, .. } => Some(*current),
            _ => None,
        }
    }
}
