//! Error types for parsing shared identifiers.

/// Errors returned when decoding identifiers from their text form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    /// The string is not valid hexadecimal.
    #[error("invalid hex string {input:?}: {reason}")]
    InvalidHex {
        /// The offending input.
        input: String,
        /// Why decoding failed.
        reason: String,
    },

    /// The decoded hash has the wrong number of bytes.
    #[error("invalid block hash length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}
