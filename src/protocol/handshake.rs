//! Capability handshake exchanged before any framed traffic.
//!
//! The listening side emits one newline-terminated ASCII line immediately
//! after accepting a connection; the connecting side reads it byte by byte
//! under a deadline. A session whose line lacks the `FRAMING=1` token is
//! never treated as framing-capable — there is no silent legacy fallback.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BridgeError, Result};

/// Capability token a protocol-compatible peer must advertise.
pub const FRAMING_TOKEN: &str = "FRAMING=1";

/// Greeting line the stdio listener emits on accept (newline appended on the
/// wire).
pub const HANDSHAKE_GREETING: &str = "MCP/1.0 FRAMING=1";

/// Read the handshake line: bytes until `\n`, `max_len`, or the deadline.
///
/// Returns the accumulated ASCII text without the trailing newline. A peer
/// close before any newline is a handshake failure, not an I/O error, so the
/// caller can report "peer present but not protocol-compatible".
pub async fn read_handshake_line<S>(
    stream: &mut S,
    deadline: Duration,
    max_len: usize,
) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    tokio::time::timeout(deadline, async {
        let mut line = Vec::with_capacity(64);
        let mut byte = [0u8; 1];

        loop {
            let n = stream.read(&mut byte).await?;
            if n == 0 {
                return Err(BridgeError::Handshake(
                    "Connection closed before handshake line".to_string(),
                ));
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
            if line.len() >= max_len {
                break;
            }
        }

        String::from_utf8(line)
            .map_err(|_| BridgeError::Handshake("Handshake line is not valid ASCII".to_string()))
    })
    .await
    .map_err(|_| BridgeError::Timeout("handshake read"))?
}

/// Check whether a handshake line advertises the framing capability.
#[inline]
pub fn is_framing_capable(line: &str) -> bool {
    line.contains(FRAMING_TOKEN)
}

/// Write the greeting line (with trailing newline) to a freshly accepted
/// connection.
pub async fn write_greeting<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(HANDSHAKE_GREETING.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}
