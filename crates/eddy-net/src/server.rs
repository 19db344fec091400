//! TCP server dispatching [`EddyRequest`]s to the hosted services.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use eddy_meta::MetaStore;
use eddy_store::BlockStoreService;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::message::{EddyRequest, EddyResponse, RpcError};
use crate::transport::{recv_frame, send_frame};

/// Serves the metadata service, the block service, or both on one listener.
///
/// Each accepted connection gets its own task and may carry any number of
/// sequential request/response exchanges.
#[derive(Clone, Default)]
pub struct RpcServer {
    meta: Option<Arc<MetaStore>>,
    block: Option<Arc<BlockStoreService>>,
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("meta", &self.meta.is_some())
            .field("block", &self.block.is_some())
            .finish()
    }
}

impl RpcServer {
    /// A server hosting no services; only `Ping` is answered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host the metadata service.
    pub fn with_meta(mut self, meta: Arc<MetaStore>) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Host the block service.
    pub fn with_block_store(mut self, block: Arc<BlockStoreService>) -> Self {
        self.block = Some(block);
        self
    }

    /// Accept connections on `listener` until the task is dropped.
    ///
    /// Connection tasks are owned by this future: dropping or aborting it
    /// closes every open connection too.
    pub async fn serve(self, listener: TcpListener) -> Result<(), NetError> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        info!(
            addr = ?local,
            meta = self.meta.is_some(),
            block = self.block.is_some(),
            "rpc server listening"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    debug!(%peer, "accepted connection");

                    let server = self.clone();
                    connections.spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
                // Reap finished connection tasks.
                Some(_) = connections.join_next() => {}
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }

        loop {
            let request: EddyRequest = match recv_frame(&mut stream).await {
                Ok(request) => request,
                Err(NetError::Closed) => {
                    debug!(%peer, "connection closed");
                    break;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "failed to read request");
                    break;
                }
            };

            let response = self.handle(request).await;
            match send_frame(&mut stream, &response).await {
                Ok(()) => {}
                // Nothing was written, so the stream is still in sync.
                Err(NetError::Serialization(reason)) => {
                    warn!(%peer, %reason, "response could not be framed");
                    let refusal = EddyResponse::Error(RpcError::Internal(format!(
                        "response not sent: {reason}"
                    )));
                    if let Err(e) = send_frame(&mut stream, &refusal).await {
                        warn!(%peer, error = %e, "failed to send response");
                        break;
                    }
                }
                Err(e) => {
                    warn!(%peer, error = %e, "failed to send response");
                    break;
                }
            }
        }
    }

    /// Execute one request against the hosted services.
    pub async fn handle(&self, request: EddyRequest) -> EddyResponse {
        let kind = request.kind();
        debug!(request = kind, "handling request");

        self.dispatch(request).await.unwrap_or_else(|e| {
            match &e {
                RpcError::VersionConflict { .. } => {
                    debug!(request = kind, error = %e, "request rejected")
                }
                _ => warn!(request = kind, error = %e, "request failed"),
            }
            EddyResponse::Error(e)
        })
    }

    async fn dispatch(&self, request: EddyRequest) -> Result<EddyResponse, RpcError> {
        let response = match request {
            EddyRequest::Ping => EddyResponse::Pong,

            EddyRequest::GetFileInfoMap => {
                EddyResponse::FileInfoMap(self.meta()?.get_file_info_map().await)
            }
            EddyRequest::UpdateFile(file) => {
                EddyResponse::Version(self.meta()?.update_file(file).await?)
            }
            EddyRequest::GetBlockStoreMap(hashes) => {
                EddyResponse::BlockStoreMap(self.meta()?.get_block_store_map(&hashes).await?)
            }
            EddyRequest::GetRing => EddyResponse::Ring(self.meta()?.ring_snapshot().await),
            EddyRequest::AddNode { addr } => {
                EddyResponse::Membership(self.meta()?.add_node(&addr).await?)
            }
            EddyRequest::RemoveNode { addr } => {
                EddyResponse::Membership(self.meta()?.remove_node(&addr).await?)
            }

            EddyRequest::GetBlock(hash) => EddyResponse::Block(self.block()?.get_block(hash).await?),
            EddyRequest::PutBlock(block) => {
                EddyResponse::Stored(self.block()?.put_block(block).await?)
            }
            EddyRequest::HasBlocks(hashes) => {
                EddyResponse::BlockHashes(self.block()?.has_blocks(&hashes).await?)
            }
            EddyRequest::GetBlockMap => EddyResponse::BlockMap(self.block()?.get_block_map().await?),
            EddyRequest::MigrateBlocks(inst) => {
                EddyResponse::Migrated(self.block()?.migrate_blocks(&inst).await?.moved)
            }
        };
        Ok(response)
    }

    fn meta(&self) -> Result<&MetaStore, RpcError> {
        self.meta
            .as_deref()
            .ok_or_else(|| RpcError::Unsupported("metadata service not hosted here".into()))
    }

    fn block(&self) -> Result<&BlockStoreService, RpcError> {
        self.block
            .as_deref()
            .ok_or_else(|| RpcError::Unsupported("block service not hosted here".into()))
    }
}
