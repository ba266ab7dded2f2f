//! Reload-survival coordination.
//!
//! A host reload looks like a process restart from the peer's point of view.
//! This coordinator hooks the teardown/rebuild boundary: before teardown it
//! persists a resume intent, stops the stdio side cleanly and marks the
//! heartbeat "reloading"; after rebuild it consumes the intent, restarts the
//! same mode and schedules a liveness probe. HTTP transports survive the
//! boundary on their own and are never touched here.

use std::sync::Arc;

use async_trait::async_trait;

use crate::heartbeat::{HeartbeatRecord, HeartbeatStatus, HeartbeatWriter};
use crate::manager::TransportManager;
use crate::probe::VerificationReport;
use crate::store::{KeyValueStore, KEY_RESUME_STDIO, KEY_TRANSPORT_MODE};
use crate::transport::TransportMode;

/// A stdio listener started outside the manager's tracking (a known bypass
/// path). The coordinator consults it in addition to the manager so a
/// bypass-started listener is still stopped cleanly before teardown.
#[async_trait]
pub trait ExternalListener: Send + Sync {
    /// Whether the bypass listener is currently running.
    fn is_running(&self) -> bool;

    /// Stop the bypass listener.
    async fn stop(&self);
}

/// Coordinates transport state across the host teardown/rebuild boundary.
pub struct ReloadCoordinator {
    manager: Arc<TransportManager>,
    store: Arc<dyn KeyValueStore>,
    heartbeat: Arc<dyn HeartbeatWriter>,
    external: Option<Arc<dyn ExternalListener>>,
}

impl ReloadCoordinator {
    /// Create a coordinator over the given manager, store and heartbeat sink.
    pub fn new(
        manager: Arc<TransportManager>,
        store: Arc<dyn KeyValueStore>,
        heartbeat: Arc<dyn HeartbeatWriter>,
    ) -> Self {
        Self {
            manager,
            store,
            heartbeat,
            external: None,
        }
    }

    /// Also consult (and stop) a bypass-started stdio listener.
    pub fn with_external_listener(mut self, external: Arc<dyn ExternalListener>) -> Self {
        self.external = Some(external);
        self
    }

    /// The configured preferred mode; stdio when nothing is stored.
    pub fn preferred_mode(&self) -> TransportMode {
        self.store
            .get_string(KEY_TRANSPORT_MODE)
            .as_deref()
            .and_then(TransportMode::parse)
            .unwrap_or(TransportMode::Stdio)
    }

    /// Hook point immediately before host teardown.
    ///
    /// If stdio is the preferred mode and actually running (via the manager
    /// or the bypass listener): persist the resume intent, stop the stdio
    /// side only, and mark the heartbeat "reloading" so external observers
    /// see "still here" rather than "dead". Otherwise clear any stale intent.
    pub async fn before_teardown(&self) {
        let preferred = self.preferred_mode();

        let manager_stdio = self.manager.active_mode().await == Some(TransportMode::Stdio)
            && self.manager.state().await.is_connected();
        let external_stdio = self.external.as_ref().is_some_and(|e| e.is_running());

        if preferred == TransportMode::Stdio && (manager_stdio || external_stdio) {
            if let Err(e) = self.store.set_bool(KEY_RESUME_STDIO, true) {
                tracing::warn!("Failed to persist resume intent: {e}");
            }

            if manager_stdio {
                self.manager.stop().await;
            }
            if external_stdio {
                if let Some(external) = &self.external {
                    external.stop().await;
                }
            }

            let record = HeartbeatRecord::now(true, HeartbeatStatus::Reloading);
            if let Err(e) = self.heartbeat.write(&record) {
                tracing::warn!("Failed to write reloading heartbeat: {e}");
            }
            tracing::debug!("Stdio transport parked for reload");
        } else {
            // HTTP transports survive the teardown independently; just make
            // sure no stale intent triggers a resume later.
            if let Err(e) = self.store.delete(KEY_RESUME_STDIO) {
                tracing::warn!("Failed to clear stale resume intent: {e}");
            }
        }
    }

    /// Hook point after host rebuild.
    ///
    /// Consumes the resume intent (cleared before the restart is attempted,
    /// so a failed resume never retries forever), restarts stdio through the
    /// manager, and returns the post-restart liveness report on success.
    /// `None` means there was nothing to resume or the restart failed; a
    /// failed restart is recoverable via the manual start control.
    pub async fn after_rebuild(&self) -> Option<VerificationReport> {
        if self.store.get_bool(KEY_RESUME_STDIO) != Some(true) {
            return None;
        }

        // Consume-once: clear before attempting the restart.
        if let Err(e) = self.store.delete(KEY_RESUME_STDIO) {
            tracing::warn!("Failed to consume resume intent: {e}");
        }

        if self.preferred_mode() != TransportMode::Stdio {
            tracing::debug!("Resume intent is stale (preferred mode changed), skipping");
            return None;
        }

        if !self.manager.start(TransportMode::Stdio).await {
            tracing::warn!("Stdio transport did not resume after reload");
            return None;
        }

        let record = HeartbeatRecord::now(true, HeartbeatStatus::Running);
        if let Err(e) = self.heartbeat.write(&record) {
            tracing::warn!("Failed to write running heartbeat: {e}");
        }

        Some(self.manager.verify().await)
    }

    /// Deliberate stop, as opposed to a reload: stop the active transport
    /// (and any bypass listener), drop a pending resume intent, and remove
    /// the heartbeat record so external observers read "not running" instead
    /// of a stale "running".
    pub async fn shutdown(&self) {
        self.manager.stop().await;
        if let Some(external) = &self.external {
            if external.is_running() {
                external.stop().await;
            }
        }

        if let Err(e) = self.store.delete(KEY_RESUME_STDIO) {
            tracing::warn!("Failed to clear resume intent: {e}");
        }
        if let Err(e) = self.heartbeat.clear() {
            tracing::warn!("Failed to clear heartbeat record: {e}");
        }
        tracing::debug!("Transport shut down");
    }
}
