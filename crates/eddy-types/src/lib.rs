//! Shared types and identifiers for Eddy.
//!
//! This crate defines the data model used across the Eddy workspace:
//! the content-addressed [`BlockHash`], the [`Block`] payload, per-file
//! [`FileMetaData`], and the [`MigrationInstruction`] exchanged between the
//! metadata service and block stores during rebalancing.

mod error;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use error::TypesError;

/// A position on the hash ring, always in `[0, ring_size)`.
pub type RingIndex = u64;

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Content hash of a block's bytes, as the lowercase hex string clients see.
pub fn block_hash_string(data: &[u8]) -> String {
    BlockHash::from_data(data).to_string()
}

// ---------------------------------------------------------------------------
// Block hash
// ---------------------------------------------------------------------------

/// Content-addressed identifier for a block: `sha256(block_data)`.
///
/// Displays and parses as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// Hash arbitrary data with SHA-256.
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Return the raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for BlockHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for BlockHash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| TypesError::InvalidHex {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypesError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// An immutable chunk of file data.
///
/// `size` is carried alongside the bytes because clients report it
/// separately; a well-formed block has `size == data.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Raw block contents.
    pub data: Bytes,
    /// Size of `data` in bytes.
    pub size: u64,
}

impl Block {
    /// Build a block from its contents, recording the size.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self { data, size }
    }

    /// Content hash of this block.
    pub fn hash(&self) -> BlockHash {
        BlockHash::from_data(&self.data)
    }
}

/// The authoritative record of one file: its version and ordered block list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    /// File name, the key of the file info map.
    pub filename: String,
    /// Monotonic version; a missing file is at version 0.
    pub version: u64,
    /// Hashes of the file's blocks, in file order.
    pub block_hash_list: Vec<BlockHash>,
}

impl FileMetaData {
    /// Create a metadata record.
    pub fn new(filename: impl Into<String>, version: u64, block_hash_list: Vec<BlockHash>) -> Self {
        Self {
            filename: filename.into(),
            version,
            block_hash_list,
        }
    }
}

/// Instruction telling a block store to move a ring range to another node.
///
/// The range `[lower_index, upper_index]` is inclusive on both ends and wraps
/// around the ring when `lower_index > upper_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationInstruction {
    /// First ring index of the range.
    pub lower_index: RingIndex,
    /// Last ring index of the range.
    pub upper_index: RingIndex,
    /// Address (`host:port`) of the block store receiving the blocks.
    pub dest_addr: String,
}

impl MigrationInstruction {
    /// Whether `index` falls inside this instruction's circular range.
    pub fn covers(&self, index: RingIndex) -> bool {
        if self.lower_index <= self.upper_index {
            (self.lower_index..=self.upper_index).contains(&index)
        } else {
            index >= self.lower_index || index <= self.upper_index
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
