//! Shared test harness for Eddy integration tests.
//!
//! Provides [`LocalCluster`]: one metadata server plus N block stores, each a
//! real [`RpcServer`] on `127.0.0.1`, driven through an [`RpcClient`]. Nodes
//! can be joined, drained, killed and revived to exercise rebalancing and
//! failure handling end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eddy_meta::MetaStore;
use eddy_net::{ClientConfig, NetError, RpcClient, RpcServer};
use eddy_placement::HashRing;
use eddy_store::{BlockStore, BlockStoreService, MemoryStore};
use eddy_types::{Block, BlockHash, FileMetaData};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// RPC policy for tests: short timeouts, fast retries.
pub fn test_client_config() -> ClientConfig {
    ClientConfig {
        timeout: Duration::from_secs(2),
        migration_timeout: Duration::from_secs(10),
        max_attempts: 3,
        backoff: Duration::from_millis(20),
    }
}

// =========================================================================
// Nodes
// =========================================================================

/// A block store server and its backing memory.
///
/// The store outlives the server task so a killed node can be revived with
/// its blocks intact, as after a network partition heals.
struct BlockNode {
    addr: String,
    store: Arc<MemoryStore>,
    task: Option<JoinHandle<()>>,
}

fn spawn_block_server(
    listener: TcpListener,
    addr: &str,
    store: Arc<MemoryStore>,
    client: Arc<RpcClient>,
    ring_size: u64,
) -> JoinHandle<()> {
    let svc = BlockStoreService::new(store, client, ring_size)
        .expect("valid ring size")
        .with_local_addr(addr);
    let server = RpcServer::new().with_block_store(Arc::new(svc));
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    })
}

async fn bind_local() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

// =========================================================================
// Cluster
// =========================================================================

/// A metadata server plus block stores, all on loopback TCP.
pub struct LocalCluster {
    client: Arc<RpcClient>,
    ring_size: u64,
    meta_addr: String,
    meta_task: JoinHandle<()>,
    nodes: Vec<BlockNode>,
}

impl LocalCluster {
    /// Start `n` block stores and a metadata server whose ring holds all of them.
    pub async fn new(n: usize, ring_size: u64) -> Self {
        let client = Arc::new(RpcClient::new(test_client_config()));

        let mut nodes = Vec::with_capacity(n);
        for _ in 0..n {
            let (listener, addr) = bind_local().await;
            let store = Arc::new(MemoryStore::new());
            let task =
                spawn_block_server(listener, &addr, store.clone(), client.clone(), ring_size);
            nodes.push(BlockNode {
                addr,
                store,
                task: Some(task),
            });
        }

        let ring = HashRing::new(ring_size, nodes.iter().map(|n| n.addr.clone()))
            .expect("valid ring size");
        let meta = MetaStore::new(ring, client.clone())
            .with_migration_timeout(Duration::from_secs(20));
        let (listener, meta_addr) = bind_local().await;
        let server = RpcServer::new().with_meta(Arc::new(meta));
        let meta_task = tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        Self {
            client,
            ring_size,
            meta_addr,
            meta_task,
            nodes,
        }
    }

    /// The shared client.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Metadata server address.
    pub fn meta_addr(&self) -> &str {
        &self.meta_addr
    }

    /// Address of block node `i`.
    pub fn block_addr(&self, i: usize) -> &str {
        &self.nodes[i].addr
    }

    /// Backing store of block node `i`.
    pub fn store(&self, i: usize) -> &MemoryStore {
        &self.nodes[i].store
    }

    /// Index of the block node listening on `addr`.
    pub fn index_of(&self, addr: &str) -> usize {
        self.nodes
            .iter()
            .position(|n| n.addr == addr)
            .unwrap_or_else(|| panic!("no block node at {addr}"))
    }

    /// Number of block nodes started, on the ring or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no block nodes were started.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Start a block store that is not yet on the ring. Returns its index.
    pub async fn spawn_block_node(&mut self) -> usize {
        let (listener, addr) = bind_local().await;
        let store = Arc::new(MemoryStore::new());
        let task = spawn_block_server(
            listener,
            &addr,
            store.clone(),
            self.client.clone(),
            self.ring_size,
        );
        self.nodes.push(BlockNode {
            addr,
            store,
            task: Some(task),
        });
        self.nodes.len() - 1
    }

    /// Start a block store and add it to the ring. Returns its index.
    pub async fn join_node(&mut self) -> Result<usize, NetError> {
        let i = self.spawn_block_node().await;
        self.client.add_node(&self.meta_addr, &self.nodes[i].addr).await?;
        Ok(i)
    }

    /// Ask the metadata server to drain and remove block node `i`.
    pub async fn leave_node(&self, i: usize) -> Result<bool, NetError> {
        self.client
            .remove_node(&self.meta_addr, &self.nodes[i].addr)
            .await
    }

    /// Stop block node `i`'s server and close its connections. Its blocks are kept.
    pub async fn kill_node(&mut self, i: usize) {
        if let Some(task) = self.nodes[i].task.take() {
            task.abort();
            let _ = task.await;
        }
        self.client.forget(&self.nodes[i].addr).await;
    }

    /// Restart block node `i` on its old address with its old blocks.
    pub async fn revive_node(&mut self, i: usize) {
        let addr = self.nodes[i].addr.clone();
        let mut attempts = 0;
        let listener = loop {
            match TcpListener::bind(&addr).await {
                Ok(listener) => break listener,
                Err(_) if attempts < 50 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("failed to rebind {addr}: {e}"),
            }
        };
        let task = spawn_block_server(
            listener,
            &addr,
            self.nodes[i].store.clone(),
            self.client.clone(),
            self.ring_size,
        );
        self.nodes[i].task = Some(task);
    }

    /// The metadata server's current ring.
    pub async fn ring(&self) -> HashRing {
        self.client.get_ring(&self.meta_addr).await.unwrap()
    }

    /// Blocks held by each node, in node order.
    pub fn block_counts(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.store.len()).collect()
    }

    /// Blocks held across all nodes.
    pub fn total_blocks(&self) -> usize {
        self.block_counts().iter().sum()
    }

    /// Assert every stored block sits on the node the current ring routes it to.
    pub async fn assert_placement(&self) {
        let ring = self.ring().await;
        for node in &self.nodes {
            for hash in node.store.list().await.unwrap() {
                let owner = ring.find_block_owner(&hash).unwrap();
                assert_eq!(
                    owner.addr, node.addr,
                    "{hash} is on {} but routes to {}",
                    node.addr, owner.addr
                );
            }
        }
    }

    // ---------------------------------------------------------------------
    // File client
    // ---------------------------------------------------------------------

    /// Split `data` into blocks, store them where the ring says, then commit
    /// the next version of `name`. Returns the committed version.
    pub async fn upload(&self, name: &str, data: &[u8], block_size: usize) -> Result<u64, NetError> {
        let files = self.client.get_file_info_map(&self.meta_addr).await?;
        let version = files.get(name).map_or(0, |f| f.version) + 1;

        let blocks: Vec<Block> = data
            .chunks(block_size)
            .map(|chunk| Block::new(chunk.to_vec()))
            .collect();
        let hashes: Vec<BlockHash> = blocks.iter().map(Block::hash).collect();
        let by_hash: HashMap<BlockHash, &Block> = hashes.iter().copied().zip(&blocks).collect();

        let routing = self
            .client
            .get_block_store_map(&self.meta_addr, hashes.clone())
            .await?;
        for (addr, owned) in routing {
            for hash in owned {
                self.client.put_block(&addr, by_hash[&hash].clone()).await?;
            }
        }

        self.client
            .update_file(&self.meta_addr, FileMetaData::new(name, version, hashes))
            .await
    }

    /// Fetch and reassemble the latest version of `name`, or `None` if unknown.
    ///
    /// Panics if a block the metadata references cannot be found on its owner.
    pub async fn download(&self, name: &str) -> Result<Option<Vec<u8>>, NetError> {
        let files = self.client.get_file_info_map(&self.meta_addr).await?;
        let Some(file) = files.get(name) else {
            return Ok(None);
        };

        let routing = self
            .client
            .get_block_store_map(&self.meta_addr, file.block_hash_list.clone())
            .await?;
        let mut fetched: HashMap<BlockHash, Block> = HashMap::new();
        for (addr, owned) in routing {
            for hash in owned {
                let block = self
                    .client
                    .get_block(&addr, hash)
                    .await?
                    .unwrap_or_else(|| panic!("block {hash} of {name} missing from {addr}"));
                fetched.insert(hash, block);
            }
        }

        let mut data = Vec::new();
        for hash in &file.block_hash_list {
            data.extend_from_slice(&fetched[hash].data);
        }
        Ok(Some(data))
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        self.meta_task.abort();
        for node in &self.nodes {
            if let Some(task) = &node.task {
                task.abort();
            }
        }
    }
}

// =========================================================================
// Data helpers
// =========================================================================

/// Generate deterministic test data of the given size.
pub fn test_data(size: usize) -> Vec<u8> {
    test_data_seeded(size, 0xDEAD_BEEF)
}

/// Generate deterministic test data with a specific seed.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}
