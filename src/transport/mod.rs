//! Transport abstraction and the two concrete carriers.
//!
//! A [`TransportClient`] is one mutually exclusive carrier protocol:
//! [`StdioTransportClient`] (local socket bridge) or [`HttpTransportClient`]
//! (remote WebSocket). Each exposes the same start/stop/verify contract and
//! owns its own [`TransportState`]; the manager only reads it.

mod http;
mod stdio;

pub use http::{HttpTransportClient, HTTP_TRANSPORT_NAME};
pub use stdio::{StdioTransportClient, STDIO_TRANSPORT_NAME};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BridgeError, Result};
use crate::probe::VerificationReport;

/// The two carrier protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Local socket bridge to a subprocess-like peer.
    Stdio,
    /// Remote WebSocket carrier.
    Http,
}

impl TransportMode {
    /// Stable lowercase name, also the value stored under `transport.mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Stdio => "stdio",
            TransportMode::Http => "http",
        }
    }

    /// Parse a stored mode name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdio" => Some(TransportMode::Stdio),
            "http" => Some(TransportMode::Http),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state owned by the client instance that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected; carries the transport name and a reason.
    Disconnected {
        /// Transport name the state refers to.
        transport: String,
        /// Why the transport is down.
        reason: String,
    },
    /// Start in progress.
    Connecting,
    /// Channel established and serving.
    Connected,
    /// Failed; carries the transport name and a reason.
    Error {
        /// Transport name the state refers to.
        transport: String,
        /// What went wrong.
        reason: String,
    },
}

impl TransportState {
    /// Whether the transport is currently up.
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportState::Connected)
    }
}

/// One carrier protocol instance.
///
/// `start` returns `false` (never errors) on any failure to reach
/// `Connected`; low-level errors are converted into state transitions plus
/// messages at this boundary and never thrown out of the contract methods.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Stable transport name for states and logs.
    fn name(&self) -> &'static str;

    /// Current state (cheap, lock-guarded read).
    fn state(&self) -> TransportState;

    /// Open the connection/listener and perform capability negotiation.
    async fn start(&self) -> bool;

    /// Close the channel and transition to `Disconnected`. Idempotent.
    async fn stop(&self);

    /// Run a liveness check against the established channel.
    async fn verify(&self) -> VerificationReport;
}

/// Seam for application-level payload semantics, which are out of scope for
/// the channel itself. The stdio serve loop answers liveness pings in-loop
/// and hands everything else to this dispatcher.
#[async_trait]
pub trait PayloadDispatcher: Send + Sync {
    /// Handle one request payload and produce the response payload.
    async fn dispatch(&self, payload: Bytes) -> Result<Bytes>;
}

/// Dispatcher used when no tool catalog is wired in: every non-ping request
/// is answered with a protocol error.
pub struct NullDispatcher;

#[async_trait]
impl PayloadDispatcher for NullDispatcher {
    async fn dispatch(&self, _payload: Bytes) -> Result<Bytes> {
        Err(BridgeError::Protocol(
            "No payload dispatcher registered".to_string(),
        ))
    }
}
