//! Listening-port allocation for the local stdio bridge.
//!
//! The allocator bind-probes candidate ports so a port already held by an
//! unrelated process is never silently adopted, then persists the winner so
//! subsequent starts (and the out-of-process server's discovery) reuse it.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::DEFAULT_PORT;
use crate::error::Result;
use crate::store::{KeyValueStore, KEY_TRANSPORT_PORT};

/// How many ports above the requested one to probe before falling back to an
/// OS-assigned ephemeral port.
const PROBE_WINDOW: u16 = 10;

/// Chooses and persists the stdio listener port.
pub struct PortAllocator {
    host: String,
    store: Arc<dyn KeyValueStore>,
}

impl PortAllocator {
    /// Create an allocator binding probes against `host`.
    pub fn new(host: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            host: host.into(),
            store,
        }
    }

    /// The currently persisted port, or [`DEFAULT_PORT`] if none was ever
    /// allocated.
    pub fn current_port(&self) -> u16 {
        self.store.get_u16(KEY_TRANSPORT_PORT).unwrap_or(DEFAULT_PORT)
    }

    /// Validate `requested` is bindable, probing nearby alternatives and
    /// finally an ephemeral port if it is not. Persists and returns the
    /// chosen port.
    pub async fn set_preferred_port(&self, requested: u16) -> Result<u16> {
        if let Some(port) = self.probe(requested).await {
            return self.persist(port);
        }

        for candidate in (requested.saturating_add(1))..=(requested.saturating_add(PROBE_WINDOW)) {
            if let Some(port) = self.probe(candidate).await {
                tracing::debug!(requested, chosen = port, "Preferred port busy, using neighbor");
                return self.persist(port);
            }
        }

        // Ephemeral fallback: ask the OS, record what it handed out.
        let listener = TcpListener::bind((self.host.as_str(), 0)).await?;
        let port = listener.local_addr()?.port();
        drop(listener);
        tracing::debug!(requested, chosen = port, "Falling back to ephemeral port");
        self.persist(port)
    }

    /// One verification bind attempt; `None` means the port is in contended
    /// use.
    async fn probe(&self, port: u16) -> Option<u16> {
        match TcpListener::bind((self.host.as_str(), port)).await {
            Ok(listener) => {
                let port = listener.local_addr().ok()?.port();
                drop(listener);
                Some(port)
            }
            Err(_) => None,
        }
    }

    fn persist(&self, port: u16) -> Result<u16> {
        self.store.set_u16(KEY_TRANSPORT_PORT, port)?;
        Ok(port)
    }
}
