//! Length-prefixed postcard framing over byte streams.
//!
//! A frame is a 4-byte big-endian payload length followed by the
//! postcard-encoded payload. The same framing carries requests and
//! responses in both directions of a TCP connection.

use std::io::ErrorKind;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;

/// Maximum frame payload: 64 MB.
///
/// Blocks are small, but `GetBlockMap` returns a store's entire contents in
/// one frame. A store holding more than this cannot be dumped; the server
/// answers with [`RpcError::Internal`](crate::RpcError::Internal) instead.
/// `HasBlocks` checks specific hashes on a large store.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Encode `message` and write it as one frame.
pub async fn send_frame<W, T>(writer: &mut W, message: &T) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        postcard::to_allocvec(message).map_err(|e| NetError::Serialization(e.to_string()))?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {} bytes (max {MAX_MESSAGE_SIZE})",
            payload.len()
        )));
    }

    // Length prefix (4 bytes big-endian).
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it.
///
/// Returns [`NetError::Closed`] if the stream ends cleanly before a frame
/// starts or partway through one.
pub async fn recv_frame<R, T>(reader: &mut R) -> Result<T, NetError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    read_exact(reader, &mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"
        )));
    }

    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload).await?;
    postcard::from_bytes(&payload).map_err(|e| NetError::Serialization(e.to_string()))
}

async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), NetError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(NetError::Closed),
        Err(e) => Err(NetError::Io(e)),
    }
}
