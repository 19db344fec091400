//! Consistent hashing ring implementation.

use eddy_types::{BlockHash, RingIndex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::RingError;

/// A block store placed on the ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Network address of the block store (`host:port`).
    pub addr: String,
    /// Position on the ring.
    pub index: RingIndex,
}

impl Node {
    fn sort_key(&self) -> (RingIndex, &str) {
        (self.index, self.addr.as_str())
    }
}

/// Reduce a big-endian unsigned integer modulo `ring_size`.
///
/// The whole value takes part in the reduction (Horner's rule, one byte at a
/// time), so a 256-bit hash is reduced exactly rather than truncated.
pub fn hash_mod(bytes: &[u8], ring_size: u64) -> Result<RingIndex, RingError> {
    if ring_size == 0 {
        return Err(RingError::InvalidRingSize(ring_size));
    }
    Ok(reduce(bytes, ring_size))
}

/// Interpret a hex string as a big unsigned integer and reduce it modulo `ring_size`.
pub fn hash_mod_hex(hex_hash: &str, ring_size: u64) -> Result<RingIndex, RingError> {
    let bytes = hex::decode(hex_hash).map_err(|_| RingError::InvalidHash(hex_hash.to_string()))?;
    hash_mod(&bytes, ring_size)
}

fn reduce(bytes: &[u8], ring_size: u64) -> RingIndex {
    let modulus = u128::from(ring_size);
    // acc < 2^64, so acc * 256 + 255 always fits in a u128.
    let rem = bytes
        .iter()
        .fold(0u128, |acc, &b| (acc * 256 + u128::from(b)) % modulus);
    rem as RingIndex
}

/// Consistent hash ring over `ring_size` positions.
///
/// Nodes are kept sorted by `(index, addr)`. When several nodes land on the
/// same index, the lexicographically smallest address comes first and wins
/// every lookup for that position; the others own an empty range until it
/// leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRing {
    ring_size: u64,
    nodes: Vec<Node>,
}

impl HashRing {
    /// Create a ring seeded with the given block store addresses.
    pub fn new<I, S>(ring_size: u64, addrs: I) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::empty(ring_size)?;
        for addr in addrs {
            ring.add_node(addr);
        }
        Ok(ring)
    }

    /// Create an empty ring.
    pub fn empty(ring_size: u64) -> Result<Self, RingError> {
        if ring_size == 0 {
            return Err(RingError::InvalidRingSize(ring_size));
        }
        Ok(Self {
            ring_size,
            nodes: Vec::new(),
        })
    }

    /// Build a ring from nodes whose indices are already known.
    ///
    /// Indices are reduced modulo `ring_size`.
    pub fn from_nodes(ring_size: u64, nodes: Vec<Node>) -> Result<Self, RingError> {
        let mut ring = Self::empty(ring_size)?;
        ring.nodes = nodes
            .into_iter()
            .map(|n| Node {
                index: n.index % ring_size,
                addr: n.addr,
            })
            .collect();
        ring.nodes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(ring)
    }

    /// Number of positions on the ring.
    pub fn ring_size(&self) -> u64 {
        self.ring_size
    }

    /// Nodes in ring order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes on the ring.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the ring has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node with this address is on the ring.
    pub fn contains(&self, addr: &str) -> bool {
        self.nodes.iter().any(|n| n.addr == addr)
    }

    /// Ring position of a block. Block hashes are already SHA-256 digests.
    pub fn compute_block_index(&self, hash: &BlockHash) -> RingIndex {
        reduce(hash.as_bytes(), self.ring_size)
    }

    /// Ring position of a node: `sha256(addr) mod ring_size`.
    pub fn compute_node_index(&self, addr: &str) -> RingIndex {
        reduce(&Sha256::digest(addr.as_bytes()), self.ring_size)
    }

    /// Find the node responsible for `ring_index`.
    ///
    /// That is the first node whose index is `>= ring_index`, wrapping to the
    /// lowest node when `ring_index` is past every node.
    pub fn find_hosting_node(&self, ring_index: RingIndex) -> Result<&Node, RingError> {
        let pos = self.nodes.partition_point(|n| n.index < ring_index);
        self.nodes
            .get(pos)
            .or_else(|| self.nodes.first())
            .ok_or(RingError::EmptyRing)
    }

    /// Node responsible for a block.
    pub fn find_block_owner(&self, hash: &BlockHash) -> Result<&Node, RingError> {
        self.find_hosting_node(self.compute_block_index(hash))
    }

    /// Add a node, keeping ring order. Duplicate addresses are not rejected.
    pub fn add_node(&mut self, addr: impl Into<String>) -> Node {
        let addr = addr.into();
        let node = Node {
            index: self.compute_node_index(&addr),
            addr,
        };
        let pos = self
            .nodes
            .partition_point(|n| n.sort_key() < node.sort_key());
        self.nodes.insert(pos, node.clone());
        debug!(addr = %node.addr, index = node.index, "added node to ring");
        node
    }

    /// Remove a node by address. Returns the removed node, if it was present.
    pub fn remove_node(&mut self, addr: &str) -> Option<Node> {
        let index = self.compute_node_index(addr);
        let pos = self
            .nodes
            .binary_search_by(|n| n.sort_key().cmp(&(index, addr)))
            .ok()?;
        let node = self.nodes.remove(pos);
        debug!(addr, index, "removed node from ring");
        Some(node)
    }

    /// The inclusive circular range `(lower, upper)` of indices owned by `addr`.
    ///
    /// Returns `None` if the node is absent or owns nothing (it collides with
    /// a node that sorts before it).
    pub fn owned_range(&self, addr: &str) -> Option<(RingIndex, RingIndex)> {
        let pos = self.nodes.iter().position(|n| n.addr == addr)?;
        let node = &self.nodes[pos];
        let pred = if pos == 0 {
            self.nodes.last()?
        } else {
            &self.nodes[pos - 1]
        };

        let lower = (node.index + 1) % self.ring_size;
        if pred.index == node.index {
            // At position 0 this means every node shares one index, and the
            // first of them owns the whole ring.
            return (pos == 0).then_some((lower, node.index));
        }

        Some(((pred.index + 1) % self.ring_size, node.index))
    }
}
