//! Block storage trait, in-memory backend, and the block store service.
//!
//! This crate defines the [`BlockStore`] trait for holding content-addressed
//! blocks locally, the [`MemoryStore`] backend, and [`BlockStoreService`],
//! which implements the per-node RPC contract: get, put, batched existence
//! checks, debug dumps, and migration of a ring range to another node.
//!
//! Remote puts made during migration go through the [`BlockTransfer`] trait so
//! the service can run against a real network client or an in-process mock.

mod error;
mod memory_store;
mod service;
mod traits;

pub use error::StoreError;
pub use memory_store::MemoryStore;
pub use service::{BlockStoreService, MigrationReport};
pub use traits::{BlockStore, BlockTransfer};
