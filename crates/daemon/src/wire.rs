// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format encoding/decoding for the IPC protocol.
//!
//! Messages are 4-byte big-endian length prefix + JSON payload. File
//! transfers reuse the same framing: after a `FileHeader` response (or a
//! `SubmitJob` request declaring uploads), raw chunk frames follow,
//! terminated by an empty frame.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::protocol::{Request, Response};

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout")]
    Timeout,
}

/// Maximum message size (200 MB)
pub const MAX_MESSAGE_SIZE: usize = 200 * 1024 * 1024;

/// Chunk size for file streaming (1 MiB)
pub const FILE_CHUNK_SIZE: usize = 1024 * 1024;

/// Default IPC timeout for control frames
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Timeout for individual file chunk frames (uploads can be slow)
pub const FILE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Protocol version
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Encode a message to JSON bytes (without length prefix)
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Decode a message from wire format
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read a length-prefixed message from an async reader
pub async fn read_message<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write a length-prefixed message to an async writer
pub async fn write_message<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    let len = data.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    writer.write_all(&(len as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a request with timeout
pub async fn read_request<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
    timeout: std::time::Duration,
) -> Result<Request, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&bytes)
}

/// Write a response with timeout
pub async fn write_response<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: std::time::Duration,
) -> Result<(), ProtocolError> {
    let data = encode(response)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

/// Stream a file as chunk frames + empty terminator frame.
pub async fn write_file_stream<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    path: &std::path::Path,
) -> Result<u64, ProtocolError> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        write_message(writer, &buf[..n]).await?;
        sent += n as u64;
    }
    write_message(writer, &[]).await?;
    Ok(sent)
}

/// Receive a chunked file stream into `dst`, fsyncing on completion.
/// Each chunk frame gets its own timeout.
pub async fn read_file_stream<R: tokio::io::AsyncReadExt + Unpin>(
    reader: &mut R,
    dst: &std::path::Path,
) -> Result<u64, ProtocolError> {
    use tokio::io::AsyncWriteExt as _;
    let mut file = tokio::fs::File::create(dst).await?;
    let mut received = 0u64;
    loop {
        let chunk = tokio::time::timeout(FILE_TIMEOUT, read_message(reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        if chunk.is_empty() {
            break;
        }
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    file.sync_all().await?;
    Ok(received)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
