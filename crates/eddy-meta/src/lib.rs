//! Cluster-wide file metadata and block routing.
//!
//! [`MetaStore`] owns two pieces of state:
//!
//! - the file info map, `filename` → [`FileMetaData`](eddy_types::FileMetaData),
//!   updated with optimistic concurrency (each update must advance the
//!   version by exactly one);
//! - the authoritative [`HashRing`](eddy_placement::HashRing) of block stores,
//!   used to route block hashes to nodes and mutated by node join/leave.
//!
//! Membership changes drive block migration through the [`MigrationDispatch`]
//! trait, implemented over the network by `eddy-net` and in-process by tests.

mod error;
mod store;


pub use error::MetaError;
pub use store::{DEFAULT_MIGRATION_TIMEOUT, MetaStore, MigrationDispatch};
