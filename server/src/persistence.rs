//! Durable key-value storage.
//!
//! The timer core persists three keys:
//!
//! | Key | Value |
//! |-----|-------|
//! | `settings` | [`Settings`](crate::types::Settings) |
//! | `timeLogs` | array of [`TimeLog`](crate::types::TimeLog) |
//! | `activeTimers` | object of [`Timer`](crate::types::Timer) by key |
//!
//! [`JsonFileStore`] keeps them in a single `state.json`, replaced
//! atomically on every write (temp file in the same directory, then
//! rename). A missing, empty or corrupt file reads as an empty store.
//! [`MemoryKvStore`] is the in-process backend used by tests; it can be
//! told to fail writes.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

pub const SETTINGS_KEY: &str = "settings";
pub const TIME_LOGS_KEY: &str = "timeLogs";
pub const ACTIVE_TIMERS_KEY: &str = "activeTimers";

/// File name of the state file inside the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Errors from a key-value backend.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Get/set storage of JSON values.
///
/// Implementations are blocking; async callers run them on the blocking
/// pool.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, KvError>;

    /// Writes several keys as one operation.
    fn set_many(&self, entries: Vec<(String, Value)>) -> Result<(), KvError>;

    fn set(&self, key: &str, value: Value) -> Result<(), KvError> {
        self.set_many(vec![(key.to_string(), value)])
    }
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, KvError> {
        self.values
            .lock()
            .map_err(|_| KvError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set_many(&self, entries: Vec<(String, Value)>) -> Result<(), KvError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("writes disabled".to_string()));
        }
        self.values()?.extend(entries);
        Ok(())
    }
}

/// Single-file JSON backend.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens (creating the directory if needed) the state file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `KvError::Io` if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self, KvError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(STATE_FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>, KvError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            warn!(path = %self.path.display(), "Empty state file, starting empty");
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                warn!(path = %self.path.display(), "State file is not an object, starting empty");
                Ok(Map::new())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to parse state file, starting empty");
                Ok(Map::new())
            }
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), KvError> {
        let content = serde_json::to_string_pretty(map)?;
        let dir = self
            .path
            .parent()
            .ok_or_else(|| KvError::Unavailable("state file path has no parent directory".to_string()))?;

        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist(&self.path).map_err(|e| KvError::Io(e.error))?;

        debug!(path = %self.path.display(), bytes = content.len(), "State file written");
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, KvError> {
        self.lock
            .lock()
            .map_err(|_| KvError::Unavailable("state file lock poisoned".to_string()))
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        let _guard = self.guard()?;
        Ok(self.read_map()?.remove(key))
    }

    fn set_many(&self, entries: Vec<(String, Value)>) -> Result<(), KvError> {
        let _guard = self.guard()?;
        let mut map = self.read_map()?;
        map.extend(entries);
        self.write_map(&map)
    }
}
