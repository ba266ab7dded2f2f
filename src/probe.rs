//! Liveness probe: connect, handshake, ping/pong.
//!
//! Used both for ad-hoc "test connection" actions and for automatic
//! post-resume health checks. Every failure is caught into the returned
//! report; the probe is best-effort diagnostics, never a crash source, and
//! keeps no state between calls.

use tokio::net::TcpStream;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::protocol::{framing, handshake};

/// Liveness request payload.
pub const PING_PAYLOAD: &[u8] = b"ping";

/// Token the response payload must contain (case-insensitive substring).
pub const PONG_TOKEN: &str = "pong";

/// Outcome of one verification attempt. Produced once, never mutated.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Overall verdict.
    pub success: bool,
    /// Human-readable description for UI/logging.
    pub message: String,
    /// Whether a protocol-compatible handshake line was read.
    pub handshake_valid: bool,
    /// Whether the framed ping round trip completed with a pong.
    pub ping_succeeded: bool,
}

impl VerificationReport {
    /// Report for a probe that never reached the peer.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            handshake_valid: false,
            ping_succeeded: false,
        }
    }
}

/// Probe a framed stdio endpoint at `addr` (e.g. `"127.0.0.1:6500"`).
///
/// Stages, in order: TCP connect under the connect deadline, handshake read
/// under the handshake deadline, framed `ping` round trip under the frame
/// deadline. Stops at the first failing stage.
pub async fn verify_endpoint(addr: &str, config: &BridgeConfig) -> VerificationReport {
    let mut stream = match connect(addr, config).await {
        Ok(stream) => stream,
        Err(e) => {
            // Refused, unreachable or slow all read the same to the caller:
            // nothing answered within the connect deadline.
            tracing::debug!(addr, "Connect stage failed: {e}");
            return VerificationReport::failure("Connection timeout");
        }
    };

    let line = match handshake::read_handshake_line(
        &mut stream,
        config.handshake_timeout,
        config.max_handshake_len,
    )
    .await
    {
        Ok(line) => line,
        Err(e) => return VerificationReport::failure(format!("Handshake failed: {e}")),
    };

    if !handshake::is_framing_capable(&line) {
        return VerificationReport::failure(format!(
            "Peer is not framing-capable (handshake: {line:?})"
        ));
    }

    match ping_roundtrip(&mut stream, config).await {
        Ok(true) => VerificationReport {
            success: true,
            message: "Bridge verified".to_string(),
            handshake_valid: true,
            ping_succeeded: true,
        },
        Ok(false) => VerificationReport {
            success: false,
            message: "Peer responded without a pong".to_string(),
            handshake_valid: true,
            ping_succeeded: false,
        },
        Err(e) => VerificationReport {
            success: false,
            message: format!("Ping failed: {e}"),
            handshake_valid: true,
            ping_succeeded: false,
        },
    }
}

async fn connect(addr: &str, config: &BridgeConfig) -> Result<TcpStream> {
    match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(BridgeError::ConnectTimeout),
    }
}

async fn ping_roundtrip(stream: &mut TcpStream, config: &BridgeConfig) -> Result<bool> {
    framing::write_frame(stream, PING_PAYLOAD, config.frame_timeout).await?;
    let response = framing::read_frame(stream, config.frame_timeout).await?;

    let text = String::from_utf8_lossy(&response);
    Ok(text.to_ascii_lowercase().contains(PONG_TOKEN))
}
