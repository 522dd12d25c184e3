// =============================================================================
// Key-Value Persistence — single-file JSON blob store
// =============================================================================
//
// The engine persists tiny blobs (the watch list) through the `KvStore`
// trait so that components never touch the filesystem directly and tests can
// inject an in-memory store. The file backend keeps one JSON object per
// file, `{ "key": "value", ... }`, written with the atomic tmp + rename
// pattern.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::warn;

/// Errors surfaced by a [`KvStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored state is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Minimal get/set interface over a string-blob store.
pub trait KvStore: Send + Sync {
    /// Read the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value. The write is
    /// durable when this returns.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

// =============================================================================
// FileKvStore
// =============================================================================

/// File-backed [`KvStore`]: one JSON object in one file.
pub struct FileKvStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles in `set`.
    write_lock: Mutex<()>,
}

impl FileKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Read and parse the whole backing file. A missing file is an empty map.
    fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();

        // A corrupt file must not block new writes; start over from empty.
        let mut map = match self.read_map() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file unreadable — rewriting");
                HashMap::new()
            }
        };
        map.insert(key.to_string(), value.to_string());

        let content = serde_json::to_string_pretty(&map)?;

        // Atomic write: tmp sibling, then rename.
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

// =============================================================================
// In-memory store (tests)
// =============================================================================

/// In-memory [`KvStore`] used by tests; can be switched to fail every write
/// to exercise the swallow-persistence-failure paths.
#[cfg(test)]
pub struct MemoryKvStore {
    map: Mutex<HashMap<String, String>>,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn preload(self, key: &str, value: &str) -> Self {
        self.map.lock().insert(key.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
