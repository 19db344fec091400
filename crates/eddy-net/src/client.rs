//! [`RpcClient`]: typed calls to Eddy servers with timeouts and retries.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eddy_meta::{MetaError, MigrationDispatch};
use eddy_placement::HashRing;
use eddy_store::{BlockTransfer, StoreError};
use eddy_types::{Block, BlockHash, FileMetaData, MigrationInstruction};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::message::{EddyRequest, EddyResponse};
use crate::transport::{recv_frame, send_frame};

/// Idle connections kept per remote address.
const MAX_IDLE_PER_ADDR: usize = 4;

/// Timeout and retry policy for outgoing calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for one attempt (connect, send and receive).
    pub timeout: Duration,
    /// Deadline for one `MigrateBlocks` attempt, which moves many blocks.
    /// `AddNode` and `RemoveNode` wait on a migration and get this plus
    /// `timeout`.
    pub migration_timeout: Duration,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each failed attempt.
    pub backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            migration_timeout: Duration::from_secs(300),
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Client for the metadata and block services.
///
/// Connections are pooled per address and reused across calls. A connection
/// that fails mid-exchange is dropped rather than returned to the pool.
#[derive(Debug, Default)]
pub struct RpcClient {
    config: ClientConfig,
    idle: Mutex<HashMap<String, Vec<TcpStream>>>,
}

impl RpcClient {
    /// Create a client with the given policy.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// The client's timeout and retry policy.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` to `addr`, retrying transient failures.
    ///
    /// Non-idempotent requests are only retried when the connection could
    /// not be established, so the server cannot have seen them. An
    /// [`EddyResponse::Error`] is returned as [`NetError::Remote`].
    pub async fn call(&self, addr: &str, request: EddyRequest) -> Result<EddyResponse, NetError> {
        let timeout = self.timeout_for(&request);
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.backoff;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(timeout, self.exchange(addr, &request)).await
            {
                Ok(result) => result,
                Err(_) => Err(NetError::Timeout(timeout)),
            };

            let err = match result {
                Ok(EddyResponse::Error(e)) => return Err(NetError::Remote(e)),
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            let retryable = err.is_transient()
                && (request.is_idempotent() || matches!(err, NetError::Connect { .. }));
            if !retryable || attempt >= attempts {
                debug!(addr, request = request.kind(), attempt, error = %err, "rpc failed");
                return Err(err);
            }

            warn!(
                addr,
                request = request.kind(),
                attempt,
                error = %err,
                retry_in = ?backoff,
                "rpc attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }

    /// Per-attempt deadline for `request`.
    ///
    /// A membership change waits on the migration it triggers, so it gets the
    /// migration deadline plus one ordinary round trip. The metadata server
    /// then gives up on a stuck migration before the caller gives up on it.
    fn timeout_for(&self, request: &EddyRequest) -> Duration {
        match request {
            EddyRequest::MigrateBlocks(_) => self.config.migration_timeout,
            EddyRequest::AddNode { .. } | EddyRequest::RemoveNode { .. } => self
                .config
                .migration_timeout
                .saturating_add(self.config.timeout),
            _ => self.config.timeout,
        }
    }

    /// One request/response exchange on a pooled or fresh connection.
    ///
    /// Non-idempotent requests always get a fresh connection, so a stale
    /// pooled socket cannot turn them into an ambiguous failure.
    async fn exchange(&self, addr: &str, request: &EddyRequest) -> Result<EddyResponse, NetError> {
        let pooled = if request.is_idempotent() {
            self.checkout(addr).await
        } else {
            None
        };
        let mut stream = match pooled {
            Some(stream) => stream,
            None => Self::connect(addr).await?,
        };

        send_frame(&mut stream, request).await?;
        let response: EddyResponse = recv_frame(&mut stream).await?;

        self.checkin(addr, stream).await;
        Ok(response)
    }

    async fn connect(addr: &str) -> Result<TcpStream, NetError> {
        debug!(addr, "connecting to server");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetError::Connect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn checkout(&self, addr: &str) -> Option<TcpStream> {
        self.idle.lock().await.get_mut(addr).and_then(Vec::pop)
    }

    async fn checkin(&self, addr: &str, stream: TcpStream) {
        let mut idle = self.idle.lock().await;
        let pool = idle.entry(addr.to_string()).or_default();
        if pool.len() < MAX_IDLE_PER_ADDR {
            pool.push(stream);
        }
    }

    /// Drop every pooled connection to `addr`.
    pub async fn forget(&self, addr: &str) {
        self.idle.lock().await.remove(addr);
    }

    // -------------------------------------------------------------------
    // Typed calls
    // -------------------------------------------------------------------

    /// Liveness check.
    pub async fn ping(&self, addr: &str) -> Result<(), NetError> {
        match self.call(addr, EddyRequest::Ping).await? {
            EddyResponse::Pong => Ok(()),
            other => Err(unexpected("ping", other)),
        }
    }

    /// Every file's metadata.
    pub async fn get_file_info_map(
        &self,
        addr: &str,
    ) -> Result<HashMap<String, FileMetaData>, NetError> {
        match self.call(addr, EddyRequest::GetFileInfoMap).await? {
            EddyResponse::FileInfoMap(map) => Ok(map),
            other => Err(unexpected("get_file_info_map", other)),
        }
    }

    /// Propose a new file version. A conflict comes back as
    /// [`RpcError::VersionConflict`](crate::RpcError::VersionConflict).
    pub async fn update_file(&self, addr: &str, file: FileMetaData) -> Result<u64, NetError> {
        match self.call(addr, EddyRequest::UpdateFile(file)).await? {
            EddyResponse::Version(v) => Ok(v),
            other => Err(unexpected("update_file", other)),
        }
    }

    /// Route block hashes to their block stores.
    pub async fn get_block_store_map(
        &self,
        addr: &str,
        hashes: Vec<BlockHash>,
    ) -> Result<HashMap<String, Vec<BlockHash>>, NetError> {
        match self.call(addr, EddyRequest::GetBlockStoreMap(hashes)).await? {
            EddyResponse::BlockStoreMap(map) => Ok(map),
            other => Err(unexpected("get_block_store_map", other)),
        }
    }

    /// The metadata server's current ring.
    pub async fn get_ring(&self, addr: &str) -> Result<HashRing, NetError> {
        match self.call(addr, EddyRequest::GetRing).await? {
            EddyResponse::Ring(ring) => Ok(ring),
            other => Err(unexpected("get_ring", other)),
        }
    }

    /// Ask the metadata server to add `node` to the ring.
    pub async fn add_node(&self, addr: &str, node: &str) -> Result<bool, NetError> {
        let request = EddyRequest::AddNode {
            addr: node.to_string(),
        };
        match self.call(addr, request).await? {
            EddyResponse::Membership(changed) => Ok(changed),
            other => Err(unexpected("add_node", other)),
        }
    }

    /// Ask the metadata server to remove `node` from the ring.
    pub async fn remove_node(&self, addr: &str, node: &str) -> Result<bool, NetError> {
        let request = EddyRequest::RemoveNode {
            addr: node.to_string(),
        };
        match self.call(addr, request).await? {
            EddyResponse::Membership(changed) => Ok(changed),
            other => Err(unexpected("remove_node", other)),
        }
    }

    /// Fetch a block; `None` if the store does not hold it.
    pub async fn get_block(&self, addr: &str, hash: BlockHash) -> Result<Option<Block>, NetError> {
        match self.call(addr, EddyRequest::GetBlock(hash)).await? {
            EddyResponse::Block(block) => Ok(block),
            other => Err(unexpected("get_block", other)),
        }
    }

    /// Store a block on a block store.
    pub async fn put_block(&self, addr: &str, block: Block) -> Result<bool, NetError> {
        match self.call(addr, EddyRequest::PutBlock(block)).await? {
            EddyResponse::Stored(ok) => Ok(ok),
            other => Err(unexpected("put_block", other)),
        }
    }

    /// Subset of `hashes` present on a block store.
    pub async fn has_blocks(
        &self,
        addr: &str,
        hashes: Vec<BlockHash>,
    ) -> Result<Vec<BlockHash>, NetError> {
        match self.call(addr, EddyRequest::HasBlocks(hashes)).await? {
            EddyResponse::BlockHashes(present) => Ok(present),
            other => Err(unexpected("has_blocks", other)),
        }
    }

    /// Every block held by a block store.
    pub async fn get_block_map(&self, addr: &str) -> Result<HashMap<BlockHash, Block>, NetError> {
        match self.call(addr, EddyRequest::GetBlockMap).await? {
            EddyResponse::BlockMap(map) => Ok(map),
            other => Err(unexpected("get_block_map", other)),
        }
    }

    /// Ask the block store at `addr` to migrate a ring range.
    pub async fn migrate_blocks(
        &self,
        addr: &str,
        inst: MigrationInstruction,
    ) -> Result<u64, NetError> {
        match self.call(addr, EddyRequest::MigrateBlocks(inst)).await? {
            EddyResponse::Migrated(moved) => Ok(moved),
            other => Err(unexpected("migrate_blocks", other)),
        }
    }
}

fn unexpected(request: &'static str, response: EddyResponse) -> NetError {
    NetError::UnexpectedResponse {
        request,
        response: format!("{response:?}"),
    }
}

#[async_trait]
impl BlockTransfer for RpcClient {
    async fn put_block(&self, addr: &str, block: Block) -> Result<(), StoreError> {
        let hash = block.hash();
        match RpcClient::put_block(self, addr, block).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(StoreError::Transfer {
                addr: addr.to_string(),
                reason: format!("block {hash} not acknowledged"),
            }),
            Err(e) => Err(StoreError::Transfer {
                addr: addr.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl MigrationDispatch for RpcClient {
    async fn migrate_blocks(
        &self,
        source_addr: &str,
        inst: MigrationInstruction,
    ) -> Result<u64, MetaError> {
        RpcClient::migrate_blocks(self, source_addr, inst)
            .await
            .map_err(|e| MetaError::Migration {
                source_addr: source_addr.to_string(),
                reason: e.to_string(),
            })
    }
}
