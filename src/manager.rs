//! Transport manager: single owner of the active carrier.
//!
//! At most one [`TransportClient`] is active per manager instance. All start
//! and stop paths funnel through here, which is what makes the
//! single-active-transport invariant hold without external locking.

use std::sync::{Arc, Mutex};

use crate::probe::VerificationReport;
use crate::transport::{TransportClient, TransportMode, TransportState};

/// Injected constructor for transport clients, enabling test substitution.
pub type TransportFactory = Box<dyn Fn(TransportMode) -> Arc<dyn TransportClient> + Send + Sync>;

/// Owns at most one active transport and mediates mode switches.
pub struct TransportManager {
    factory: TransportFactory,
    active: tokio::sync::Mutex<Option<(TransportMode, Arc<dyn TransportClient>)>>,
    last_mode: Mutex<Option<TransportMode>>,
}

impl TransportManager {
    /// Create a manager with the given client factory.
    pub fn new(factory: TransportFactory) -> Self {
        Self {
            factory,
            active: tokio::sync::Mutex::new(None),
            last_mode: Mutex::new(None),
        }
    }

    /// Start the given mode, stopping any active transport first.
    ///
    /// Returns `false` with no active transport if the client could not reach
    /// `Connected`; the half-started client is stopped before returning.
    ///
    /// The `active` guard is held across the whole stop/start/adopt sequence,
    /// so concurrent `start` calls serialize and can never adopt two live
    /// clients.
    pub async fn start(&self, mode: TransportMode) -> bool {
        let mut active = self.active.lock().await;
        Self::shutdown_entry(active.take()).await;

        *self.last_mode.lock().expect("mode lock poisoned") = Some(mode);
        let client = (self.factory)(mode);

        if client.start().await {
            *active = Some((mode, client));
            tracing::debug!(%mode, "Transport started");
            true
        } else {
            client.stop().await;
            tracing::warn!(%mode, "Transport failed to start");
            false
        }
    }

    /// Stop the active transport, if any. Always leaves the manager in a
    /// clean disconnected state, even if the client misbehaves.
    pub async fn stop(&self) {
        let taken = self.active.lock().await.take();
        Self::shutdown_entry(taken).await;
    }

    async fn shutdown_entry(entry: Option<(TransportMode, Arc<dyn TransportClient>)>) {
        if let Some((mode, client)) = entry {
            // The slot is already clear; a panicking client cannot leave a
            // stale active transport behind.
            let stop = tokio::spawn(async move { client.stop().await });
            if let Err(e) = stop.await {
                tracing::warn!(%mode, "Transport stop misbehaved: {e}");
            }
        }
    }

    /// Verify the active transport, or fail fast if none is active.
    pub async fn verify(&self) -> VerificationReport {
        let client = self.active.lock().await.as_ref().map(|(_, c)| c.clone());
        match client {
            Some(client) => client.verify().await,
            None => VerificationReport::failure("Transport not started"),
        }
    }

    /// The active transport's state, or a synthesized `Disconnected` naming
    /// the last known mode.
    pub async fn state(&self) -> TransportState {
        let client = self.active.lock().await.as_ref().map(|(_, c)| c.clone());
        match client {
            Some(client) => client.state(),
            None => {
                let last = *self.last_mode.lock().expect("mode lock poisoned");
                TransportState::Disconnected {
                    transport: last.map(|m| m.as_str().to_string()).unwrap_or_default(),
                    reason: "Transport not started".to_string(),
                }
            }
        }
    }

    /// The mode of the currently active transport, if any.
    pub async fn active_mode(&self) -> Option<TransportMode> {
        self.active.lock().await.as_ref().map(|(mode, _)| *mode)
    }
}
