//! Consistent hashing ring for deterministic block placement.
//!
//! Nodes and blocks are mapped onto a finite cyclic index space of
//! `ring_size` positions. A node's position is `sha256(address) mod ring_size`;
//! a block's position is `block_hash mod ring_size`. Each block is owned by the
//! first node at or after its position, wrapping around to the lowest node.
//!
//! Positions are exact reductions of the full 256-bit hash, so collisions
//! between nodes are possible on small rings. Colliding nodes are ordered by
//! address; see [`HashRing`].

mod error;
mod ring;

pub use error::RingError;
pub use ring::{HashRing, Node, hash_mod, hash_mod_hex};
