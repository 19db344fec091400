//! Integration test: node failure during membership changes.
//!
//! Kill a block store that a join or leave depends on. The change must fail
//! without touching the ring or losing blocks, and succeed once the node is
//! back.

use eddy_integration_tests::{LocalCluster, test_data_seeded};
use eddy_net::{NetError, RpcError};
use eddy_types::BlockHash;

const RING: u64 = 4096;
const BLOCK_SIZE: usize = 1024;

async fn write_files(c: &LocalCluster, count: usize) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    for i in 0..count {
        let data = test_data_seeded(4000 + i * 250, 100 + i as u32);
        let name = format!("f{i}");
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

fn is_migration_failure(err: &NetError) -> bool {
    matches!(err, NetError::Remote(RpcError::Migration { .. }))
}

/// Draining a node whose successor is down fails, keeps the ring and the
/// blocks, and succeeds after the successor comes back.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_leave_with_dead_successor_is_retryable() {
    let mut c = LocalCluster::new(4, RING).await;
    let files = write_files(&c, 10).await;
    let ring = c.ring().await;
    let total = c.total_blocks();

    // Drain the fullest node so the migration has something to move.
    let counts = c.block_counts();
    let leaving = (0..c.len()).max_by_key(|&i| counts[i]).unwrap();
    let leaving_addr = c.block_addr(leaving).to_string();
    assert!(counts[leaving] > 0);

    let mut next = ring.clone();
    let removed = next.remove_node(&leaving_addr).unwrap();
    let successor_addr = next.find_hosting_node(removed.index).unwrap().addr.clone();
    let successor = c.index_of(&successor_addr);

    c.kill_node(successor).await;

    let err = c.leave_node(leaving).await.unwrap_err();
    assert!(is_migration_failure(&err), "got {err:?}");
    assert_eq!(c.ring().await, ring, "ring unchanged after failed leave");
    assert_eq!(c.store(leaving).len(), counts[leaving], "blocks kept on failure");
    assert_eq!(c.total_blocks(), total);

    c.revive_node(successor).await;

    assert!(c.leave_node(leaving).await.unwrap());
    assert!(!c.ring().await.contains(&leaving_addr));
    assert!(c.store(leaving).is_empty());
    assert_eq!(c.total_blocks(), total);
    c.assert_placement().await;
    assert_readable(&c, &files).await;
}

/// Joining next to a dead owner fails cleanly; the retry after revival
/// moves the annexed range.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_join_with_dead_owner_is_retryable() {
    let mut c = LocalCluster::new(3, RING).await;
    let files = write_files(&c, 10).await;
    let ring = c.ring().await;
    let total = c.total_blocks();

    let joining = c.spawn_block_node().await;
    let joining_addr = c.block_addr(joining).to_string();
    let index = ring.compute_node_index(&joining_addr);
    let owner_addr = ring.find_hosting_node(index).unwrap().addr.clone();
    let owner = c.index_of(&owner_addr);

    c.kill_node(owner).await;

    let err = c
        .client()
        .add_node(c.meta_addr(), &joining_addr)
        .await
        .unwrap_err();
    assert!(is_migration_failure(&err), "got {err:?}");
    assert_eq!(c.ring().await, ring, "ring unchanged after failed join");
    assert!(c.store(joining).is_empty());
    assert_eq!(c.total_blocks(), total);

    c.revive_node(owner).await;

    assert!(c.client().add_node(c.meta_addr(), &joining_addr).await.unwrap());
    assert!(c.ring().await.contains(&joining_addr));
    assert_eq!(c.total_blocks(), total);
    c.assert_placement().await;
    assert_readable(&c, &files).await;
}

/// A node that dies mid-drain cannot be removed; its blocks wait for it.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_leave_of_dead_node_fails() {
    let mut c = LocalCluster::new(3, RING).await;
    write_files(&c, 5).await;
    let ring = c.ring().await;

    c.kill_node(2).await;

    let err = c.leave_node(2).await.unwrap_err();
    assert!(is_migration_failure(&err), "got {err:?}");
    assert_eq!(c.ring().await, ring);

    c.revive_node(2).await;
    assert!(c.leave_node(2).await.unwrap());
    assert!(c.store(2).is_empty());
    c.assert_placement().await;
}

/// Reading from a dead block store surfaces a transient error.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_read_from_dead_node_is_transient() {
    let mut c = LocalCluster::new(2, RING).await;
    let addr = c.block_addr(0).to_string();

    c.kill_node(0).await;

    let err = c
        .client()
        .get_block(&addr, BlockHash::from_data(b"anything"))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "got {err:?}");

    c.revive_node(0).await;
    assert!(c.client().ping(&addr).await.is_ok());
}
