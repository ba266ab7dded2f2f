//! Persistent key-value preference store.
//!
//! The bridge keeps a handful of durable values (preferred transport mode,
//! allocated port, resume intent) in an injected [`KeyValueStore`] rather
//! than scattering ad hoc preference access across callers. Two
//! implementations: [`JsonFileStore`] backed by a single JSON object file,
//! and [`MemoryStore`] for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::Result;

/// Store key for the preferred transport mode (`"stdio"` or `"http"`).
pub const KEY_TRANSPORT_MODE: &str = "transport.mode";

/// Store key for the allocated stdio listener port.
pub const KEY_TRANSPORT_PORT: &str = "transport.port";

/// Store key for the stdio resume-intent flag.
pub const KEY_RESUME_STDIO: &str = "transport.resume.stdio";

/// Typed key-value storage with explicit lifecycle (opened once per host
/// session, no global singletons).
pub trait KeyValueStore: Send + Sync {
    /// Get a string value, `None` if absent or of another type.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Set a string value (last-write-wins).
    fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Get a boolean value, `None` if absent or of another type.
    fn get_bool(&self, key: &str) -> Option<bool>;

    /// Set a boolean value.
    fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Get a port-sized integer value.
    fn get_u16(&self, key: &str) -> Option<u16>;

    /// Set a port-sized integer value.
    fn set_u16(&self, key: &str, value: u16) -> Result<()>;

    /// Remove a key. Removing an absent key is a no-op.
    fn delete(&self, key: &str) -> Result<()>;
}

/// File-backed store: one JSON object, loaded on open, rewritten on every
/// mutation.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading existing values if the file exists.
    ///
    /// A missing file is an empty store; a corrupt file is an error so the
    /// caller can decide whether to discard it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, Value>)) -> Result<()> {
        let mut values = self.values.lock().expect("store lock poisoned");
        f(&mut values);
        let bytes = serde_json::to_vec_pretty(&*values)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn read(&self, key: &str) -> Option<Value> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.read(key)?.as_str().map(str::to_string)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|v| {
            v.insert(key.to_string(), Value::from(value));
        })
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.read(key)?.as_bool()
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.mutate(|v| {
            v.insert(key.to_string(), Value::from(value));
        })
    }

    fn get_u16(&self, key: &str) -> Option<u16> {
        self.read(key)?.as_u64().and_then(|n| u16::try_from(n).ok())
    }

    fn set_u16(&self, key: &str, value: u16) -> Result<()> {
        self.mutate(|v| {
            v.insert(key.to_string(), Value::from(value));
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mutate(|v| {
            v.remove(key);
        })
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .get(key)?
            .as_str()
            .map(str::to_string)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), Value::from(value));
        Ok(())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .get(key)?
            .as_bool()
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), Value::from(value));
        Ok(())
    }

    fn get_u16(&self, key: &str) -> Option<u16> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .get(key)?
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
    }

    fn set_u16(&self, key: &str, value: u16) -> Result<()> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), Value::from(value));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values
            .lock()
            .expect("store lock poisoned")
            .remove(key);
        Ok(())
    }
}
