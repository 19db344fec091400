//! Network protocol on TCP.
//!
//! This crate implements Eddy's RPC layer:
//!
//! - [`EddyRequest`] / [`EddyResponse`]: the wire protocol (postcard-serialized,
//!   length-prefixed frames, see [`transport`]).
//! - [`RpcServer`]: hosts a `MetaStore`, a `BlockStoreService`, or both.
//! - [`RpcClient`]: typed calls with per-attempt timeouts and retries on
//!   transient failures. It also implements `BlockTransfer` and
//!   `MigrationDispatch`, wiring block migration and membership changes
//!   over the network.

mod client;
mod error;
mod message;
mod server;
pub mod transport;

pub use client::{ClientConfig, RpcClient};
pub use error::NetError;
pub use message::{EddyRequest, EddyResponse, RpcError};
pub use server::RpcServer;
