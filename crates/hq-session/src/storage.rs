//! Durable key/value backends for the credential store
//!
//! - `MemoryStorage`: process memory, gone on exit
//! - `FileStorage`: a single JSON object on disk
//!
//! Neither backend reports errors to the caller. Storage is treated as
//! always available; I/O problems are logged and the operation degrades to
//! a no-op (writes) or an empty read.

use hq_core::{StorageBackend, StorageConfig, TokenStorage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// File name used by [`FileStorage`] inside its directory
pub const SESSION_FILE: &str = "session.json";

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// JSON-file storage.
///
/// The whole file is rewritten on every change; it only ever holds two
/// short strings. The mutex serializes read-modify-write cycles within the
/// process.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Storage at `<dir>/session.json`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::at_path(dir.as_ref().join(SESSION_FILE))
    }

    /// Storage at an explicit file path
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> HashMap<String, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read session file");
                return HashMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt session file");
            HashMap::new()
        })
    }

    fn save(&self, entries: &HashMap<String, String>) {
        if entries.is_empty() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove session file");
                }
            }
            return;
        }

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create session directory");
                return;
            }
        }

        let body = match serde_json::to_string_pretty(entries) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode session file");
                return;
            }
        };

        // Write-then-rename so a crash never leaves half a file behind
        let tmp = self.path.with_extension("json.tmp");
        let result = std::fs::write(&tmp, body).and_then(|_| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write session file");
        }
    }

    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let Ok(_guard) = self.lock.lock() else {
            return;
        };
        let mut entries = self.load();
        change(&mut entries);
        self.save(&entries);
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().ok()?;
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        });
    }

    fn remove(&self, key: &str) {
        self.update(|entries| {
            entries.remove(key);
        });
    }
}

/// Build the backend selected by configuration
pub fn from_config(config: &StorageConfig) -> Arc<dyn TokenStorage> {
    match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::File => Arc::new(FileStorage::new(&config.dir)),
    }
}
