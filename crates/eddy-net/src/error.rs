//! Error types for network operations.

use std::time::Duration;

use crate::message::RpcError;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to connect to a remote server.
    #[error("connect to {addr} failed: {reason}")]
    Connect {
        /// Remote address.
        addr: String,
        /// Underlying failure.
        reason: String,
    },

    /// Reading or writing the connection failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection before a full frame arrived.
    #[error("connection closed")]
    Closed,

    /// No response within the deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Serialization, deserialization or framing failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server answered with a response of the wrong kind.
    #[error("unexpected response to {request}: {response}")]
    UnexpectedResponse {
        /// Request kind that was sent.
        request: &'static str,
        /// Debug rendering of what came back.
        response: String,
    },

    /// The server processed the request and reported an error.
    #[error("remote error: {0}")]
    Remote(#[from] RpcError),
}

impl NetError {
    /// Whether the failure is in the transport, so a retry may succeed.
    ///
    /// Remote errors are application answers and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Io(_) | Self::Closed | Self::Timeout(_)
        )
    }
}
