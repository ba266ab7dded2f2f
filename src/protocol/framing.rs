//! Frame codec: length-prefixed binary frames.
//!
//! Wire format, repeated per frame:
//! ```text
//! ┌──────────────────┬─────────────────┐
//! │ Length           │ Payload         │
//! │ 8 bytes          │ `length` bytes  │
//! │ uint64 BE        │ opaque          │
//! └──────────────────┴─────────────────┘
//! ```
//!
//! Zero-length frames are a protocol error on both the write and the read
//! side. The fixed-width prefix supports arbitrary binary payloads with no
//! delimiter scanning; `read_exact`/`write_all` looping makes partial reads
//! and writes invisible to callers.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BridgeError, Result};

/// Length prefix size in bytes (fixed, exactly 8).
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Maximum payload size (64 MiB).
///
/// Well under `i32::MAX` so lengths stay representable as a signed 32-bit
/// count on every platform the peer may run on.
pub const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Write one frame (length prefix + payload) under a single deadline.
///
/// Rejects an empty payload with a protocol error before touching the stream.
pub async fn write_frame<S>(stream: &mut S, payload: &[u8], deadline: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(BridgeError::Protocol(
            "Zero-length frames are not allowed".to_string(),
        ));
    }
    if payload.len() as u64 > MAX_FRAME_LEN {
        return Err(BridgeError::Protocol(format!(
            "Frame length {} exceeds maximum {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let header = (payload.len() as u64).to_be_bytes();

    tokio::time::timeout(deadline, async {
        stream.write_all(&header).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;
        Ok::<_, BridgeError>(())
    })
    .await
    .map_err(|_| BridgeError::Timeout("frame write"))?
}

/// Read one complete frame under a single deadline.
///
/// Reads exactly 8 header bytes, validates the decoded length, then reads
/// exactly that many payload bytes. A peer close mid-frame is fatal and maps
/// to [`BridgeError::ConnectionClosed`].
pub async fn read_frame<S>(stream: &mut S, deadline: Duration) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(deadline, read_frame_inner(stream))
        .await
        .map_err(|_| BridgeError::Timeout("frame read"))?
}

async fn read_frame_inner<S>(stream: &mut S) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let len = read_frame_len(stream).await?;
    read_payload_inner(stream, len).await
}

/// Read and validate the 8-byte length prefix, with no deadline.
///
/// Only for waiting on the next request inside a serve loop that is
/// cancellable through `tokio::select!`; every other caller must go through
/// [`read_frame`]. Once a length has arrived, the body read gets a deadline
/// via [`read_payload`].
pub async fn read_frame_len<S>(stream: &mut S) -> Result<u64>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    stream
        .read_exact(&mut header)
        .await
        .map_err(map_eof_to_closed)?;

    let len = u64::from_be_bytes(header);
    if len == 0 {
        return Err(BridgeError::Protocol(
            "Zero-length frames are not allowed".to_string(),
        ));
    }
    if len > MAX_FRAME_LEN {
        return Err(BridgeError::Protocol(format!(
            "Frame length {} exceeds maximum {}",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(len)
}

/// Read exactly `len` payload bytes under a deadline.
pub async fn read_payload<S>(stream: &mut S, len: u64, deadline: Duration) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(deadline, read_payload_inner(stream, len))
        .await
        .map_err(|_| BridgeError::Timeout("frame read"))?
}

async fn read_payload_inner<S>(stream: &mut S, len: u64) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut payload = vec![0u8; len as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(map_eof_to_closed)?;

    Ok(Bytes::from(payload))
}

fn map_eof_to_closed(e: std::io::Error) -> BridgeError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BridgeError::ConnectionClosed
    } else {
        BridgeError::Io(e)
    }
}
