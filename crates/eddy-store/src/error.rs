//! Error types for block storage operations.

use eddy_placement::RingError;
use eddy_types::BlockHash;

/// Errors that can occur during block storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Ring arithmetic failed (e.g. a zero ring size).
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Sending a block to another node failed.
    #[error("transfer to {addr} failed: {reason}")]
    Transfer {
        /// Destination address.
        addr: String,
        /// Underlying failure.
        reason: String,
    },

    /// A migration moved some blocks but not all of them.
    ///
    /// Blocks listed in `failed` are still held by the source and the same
    /// instruction can be re-sent safely.
    #[error("partial migration to {dest}: {moved} moved, {} failed", .failed.len())]
    PartialMigration {
        /// Destination address.
        dest: String,
        /// Blocks delivered and removed locally.
        moved: u64,
        /// Blocks that could not be delivered.
        failed: Vec<BlockHash>,
    },
}
