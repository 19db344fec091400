//! Error types for ring placement.

/// Errors returned by [`HashRing`](crate::HashRing) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// A lookup was attempted on a ring with no nodes.
    #[error("hash ring has no nodes")]
    EmptyRing,

    /// The ring size must be at least 1.
    #[error("invalid ring size: {0}")]
    InvalidRingSize(u64),

    /// A hash string could not be decoded as hexadecimal.
    #[error("invalid hex hash {0:?}")]
    InvalidHash(String),
}
