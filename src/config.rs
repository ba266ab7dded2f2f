//! Bridge configuration: deadlines, limits and endpoints.
//!
//! Every transport-path operation runs under one of these deadlines; there is
//! no implicit infinite blocking anywhere below the orchestration layer.

use std::time::Duration;

/// Default TCP connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default deadline for reading the handshake line.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default deadline for a full frame read or write.
///
/// Matches the peer's own frame I/O budget so a slow-but-alive peer is not
/// misclassified as dead.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Maximum handshake line length in bytes (excluding the newline).
pub const DEFAULT_MAX_HANDSHAKE_LEN: usize = 512;

/// Default preferred port for the local stdio bridge listener.
pub const DEFAULT_PORT: u16 = 6500;

/// Configuration shared by the transports, the probe and the allocator.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Host the stdio listener binds to and the probe connects to.
    pub host: String,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    /// Handshake line read deadline.
    pub handshake_timeout: Duration,
    /// Whole-frame read/write deadline.
    pub frame_timeout: Duration,
    /// Handshake line length cap.
    pub max_handshake_len: usize,
    /// WebSocket URL for the HTTP transport.
    pub http_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            max_handshake_len: DEFAULT_MAX_HANDSHAKE_LEN,
            http_url: "ws://127.0.0.1:8080/plugin".to_string(),
        }
    }
}
