//! Host heartbeat file.
//!
//! A small externally readable JSON file lets an out-of-process peer
//! distinguish "transiently reloading" from "permanently gone" without an
//! open connection. Absence or staleness implies "not running".
//!
//! On-disk shape (field names are an external contract):
//! ```json
//! {"isAlive":true,"status":"reloading","timestamp":1766400000}
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Host liveness status as seen by external observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    /// Transport is up and serving.
    Running,
    /// Host is tearing down for a reload and will come back.
    Reloading,
}

/// One heartbeat record, overwritten on every liveness-relevant transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    /// Whether the host considers itself alive.
    #[serde(rename = "isAlive")]
    pub is_alive: bool,
    /// Current status.
    pub status: HeartbeatStatus,
    /// Unix timestamp (seconds) of the write.
    pub timestamp: u64,
}

impl HeartbeatRecord {
    /// Build a record with the current time.
    pub fn now(is_alive: bool, status: HeartbeatStatus) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            is_alive,
            status,
            timestamp,
        }
    }
}

/// Sink for heartbeat records. Injected so tests can observe transitions
/// without touching the filesystem.
pub trait HeartbeatWriter: Send + Sync {
    /// Overwrite the current record (last-write-wins).
    fn write(&self, record: &HeartbeatRecord) -> Result<()>;

    /// Remove the record entirely; external readers treat absence as "not
    /// running".
    fn clear(&self) -> Result<()>;
}

/// Heartbeat writer backed by a well-known file path.
pub struct FileHeartbeatWriter {
    path: PathBuf,
}

impl FileHeartbeatWriter {
    /// Create a writer targeting `path`. The file is not created until the
    /// first `write`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The file path this writer targets.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HeartbeatWriter for FileHeartbeatWriter {
    fn write(&self, record: &HeartbeatRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_with_external_field_names() {
        let record = HeartbeatRecord {
            is_alive: true,
            status: HeartbeatStatus::Reloading,
            timestamp: 1_766_400_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"isAlive":true,"status":"reloading","timestamp":1766400000}"#
        );
    }

    #[test]
    fn test_file_writer_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileHeartbeatWriter::new(dir.path().join("heartbeat.json"));

        writer
            .write(&HeartbeatRecord::now(true, HeartbeatStatus::Running))
            .unwrap();

        let bytes = std::fs::read(writer.path()).unwrap();
        let read: HeartbeatRecord = serde_json::from_slice(&bytes).unwrap();
        assert!(read.is_alive);
        assert_eq!(read.status, HeartbeatStatus::Running);
        assert!(read.timestamp > 0);

        writer.clear().unwrap();
        assert!(!writer.path().exists());

        // Clearing an absent file is a no-op.
        writer.clear().unwrap();
    }

    #[test]
    fn test_now_uses_wall_clock() {
        let record = HeartbeatRecord::now(true, HeartbeatStatus::Running);
        // Some sane lower bound (2020-01-01).
        assert!(record.timestamp > 1_577_836_800);
    }
}
