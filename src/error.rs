//! Error types for mcp-bridge.

use thiserror::Error;

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (heartbeat, store, WS control).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error from the HTTP transport carrier.
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    /// Protocol error (zero-length frame, oversized frame, malformed data).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Handshake line missing or lacking the capability token.
    #[error("Handshake invalid: {0}")]
    Handshake(String),

    /// TCP connect did not complete within the connect deadline.
    #[error("Connection timeout")]
    ConnectTimeout,

    /// A read or write exceeded its deadline.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Connection closed before the expected bytes arrived.
    #[error("Connection closed before reading expected bytes")]
    ConnectionClosed,
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
