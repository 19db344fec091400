//! Integration test: rebalancing.
//!
//! Start with a small cluster, join and drain block stores, verify blocks
//! follow the ring and every file stays readable.

use std::collections::HashMap;

use eddy_integration_tests::{LocalCluster, test_data_seeded};
use eddy_net::{NetError, RpcError};
use eddy_store::BlockStore;
use eddy_types::BlockHash;

const RING: u64 = 4096;
const BLOCK_SIZE: usize = 1024;

async fn write_files(c: &LocalCluster, count: usize) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    for i in 0..count {
        let data = test_data_seeded(3000 + i * 100, i as u32 + 1);
        let name = format!("obj-{i:03}");
        c.upload(&name, &data, BLOCK_SIZE).await.unwrap();
        files.push((name, data));
    }
    files
}

async fn assert_readable(c: &LocalCluster, files: &[(String, Vec<u8>)]) {
    for (name, expected) in files {
        let got = c.download(name).await.unwrap().expect("file exists");
        assert_eq!(&got, expected, "contents of {name}");
    }
}

/// Which node holds each block right now.
async fn holders(c: &LocalCluster) -> HashMap<BlockHash, usize> {
    let mut map = HashMap::new();
    for i in 0..c.len() {
        for hash in c.store(i).list().await.unwrap() {
            assert!(map.insert(hash, i).is_none(), "{hash} stored twice");
        }
    }
    map
}

/// 3 nodes, 30 files, join 2 more. Blocks move to the new owners and
/// every file stays readable.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_join_nodes_keeps_files_readable() {
    let mut c = LocalCluster::new(3, RING).await;
    let files = write_files(&c, 30).await;
    let total = c.total_blocks();

    let n4 = c.join_node().await.unwrap();
    let n5 = c.join_node().await.unwrap();

    let ring = c.ring().await;
    assert_eq!(ring.len(), 5);
    assert!(ring.contains(c.block_addr(n4)));
    assert!(ring.contains(c.block_addr(n5)));

    assert_eq!(c.total_blocks(), total, "no block lost or duplicated");
    c.assert_placement().await;
    assert_readable(&c, &files).await;
}

/// A join only pulls blocks onto the new node; nothing moves between old nodes.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_join_moves_only_annexed_range() {
    let mut c = LocalCluster::new(3, RING).await;
    write_files(&c, 20).await;
    let before = holders(&c).await;

    let joined = c.join_node().await.unwrap();
    let after = holders(&c).await;

    assert_eq!(before.len(), after.len());
    for (hash, old) in &before {
        let new = after[hash];
        assert!(
            new == *old || new == joined,
            "{hash} moved from node {old} to node {new}"
        );
    }
}

/// Draining a node empties it onto its successor and keeps files readable.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_leave_node_drains_blocks() {
    let c = LocalCluster::new(4, RING).await;
    let files = write_files(&c, 30).await;
    let total = c.total_blocks();

    assert!(c.leave_node(1).await.unwrap());

    let ring = c.ring().await;
    assert_eq!(ring.len(), 3);
    assert!(!ring.contains(c.block_addr(1)));
    assert!(c.store(1).is_empty());
    assert_eq!(c.total_blocks(), total);
    c.assert_placement().await;
    assert_readable(&c, &files).await;
}

/// Join then leave the same node: the original placement is restored.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_join_then_leave_restores_placement() {
    let mut c = LocalCluster::new(3, RING).await;
    let files = write_files(&c, 20).await;
    let original_ring = c.ring().await;
    let before = holders(&c).await;

    let joined = c.join_node().await.unwrap();
    assert!(c.leave_node(joined).await.unwrap());

    assert_eq!(c.ring().await, original_ring);
    assert_eq!(holders(&c).await, before);
    assert_readable(&c, &files).await;
}

/// Re-adding a member and removing a stranger change nothing.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_redundant_membership_changes_are_noops() {
    let mut c = LocalCluster::new(3, RING).await;
    write_files(&c, 5).await;
    let ring = c.ring().await;
    let stranger = c.spawn_block_node().await;

    assert!(!c.client().add_node(c.meta_addr(), c.block_addr(0)).await.unwrap());
    assert!(!c.leave_node(stranger).await.unwrap());
    assert_eq!(c.ring().await, ring);
}

/// The last node on the ring cannot leave.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_last_node_cannot_leave() {
    let c = LocalCluster::new(1, RING).await;
    let files = write_files(&c, 3).await;

    let err = c.leave_node(0).await.unwrap_err();
    assert!(
        matches!(err, NetError::Remote(RpcError::LastNode(_))),
        "got {err:?}"
    );
    assert_eq!(c.ring().await.len(), 1);
    assert_readable(&c, &files).await;
}
