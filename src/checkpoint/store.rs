//! Expiring key-value stores for checkpoints

use super::CheckpointError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Small string key-value store with per-entry expiry.
///
/// Expired entries behave as if they were never written.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError>;

    fn set(&self, key: &str, value: &str, expires_in: Duration) -> Result<(), CheckpointError>;

    fn delete(&self, key: &str) -> Result<(), CheckpointError>;

    /// All keys that have not expired
    fn keys(&self) -> Result<Vec<String>, CheckpointError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError> {
        let now = Utc::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, expires_in: Duration) -> Result<(), CheckpointError> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Utc::now() + expires_in,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CheckpointError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CheckpointError> {
        let now = Utc::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Store persisted as a JSON document on disk.
///
/// The whole document is rewritten on every change through a temp file and
/// rename, so a crash never leaves a half-written store behind. Inside a
/// tokio runtime the write runs on the blocking pool; reads are served from
/// memory and never wait for it.
#[derive(Debug)]
pub struct FileStore {
    entries: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
    writer: Arc<DocumentWriter>,
}

/// Serialises document writes. An older snapshot never overwrites a newer one.
#[derive(Debug)]
struct DocumentWriter {
    path: PathBuf,
    written: Mutex<u64>,
}

impl DocumentWriter {
    fn write(&self, generation: u64, document: &[u8]) -> Result<(), CheckpointError> {
        let mut written = self.written.lock();
        if generation <= *written {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, document)?;
        std::fs::rename(&tmp, &self.path)?;
        *written = generation;
        Ok(())
    }
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. Expired entries are dropped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        let mut entries: HashMap<String, Entry> = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => HashMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        entries.retain(|_, e| e.is_live(now));

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "Opened checkpoint store"
        );

        Ok(Self {
            entries: Mutex::new(entries),
            generation: AtomicU64::new(0),
            writer: Arc::new(DocumentWriter {
                path,
                written: Mutex::new(0),
            }),
        })
    }

    /// Snapshot `entries` and write them out. Must be called with the
    /// entries lock held so generations follow the order of changes.
    fn persist(&self, entries: &HashMap<String, Entry>) -> Result<(), CheckpointError> {
        let document = serde_json::to_vec_pretty(entries)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let writer = self.writer.clone();
                handle.spawn_blocking(move || {
                    if let Err(e) = writer.write(generation, &document) {
                        tracing::warn!(
                            path = %writer.path.display(),
                            error = %e,
                            "Failed to persist checkpoints"
                        );
                    }
                });
                Ok(())
            }
            Err(_) => self.writer.write(generation, &document),
        }
    }
}

/// Queued blocking writes are dropped at runtime shutdown, so write the
/// final state here if it has not reached disk yet.
impl Drop for FileStore {
    fn drop(&mut self) {
        let generation = *self.generation.get_mut();
        if *self.writer.written.lock() >= generation {
            return;
        }

        let result = serde_json::to_vec_pretty(self.entries.get_mut())
            .map_err(CheckpointError::from)
            .and_then(|document| self.writer.write(generation, &document));
        if let Err(e) = result {
            tracing::warn!(
                path = %self.writer.path.display(),
                error = %e,
                "Failed to persist checkpoints"
            );
        }
    }
}

impl CheckpointStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError> {
        let now = Utc::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, expires_in: Duration) -> Result<(), CheckpointError> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Utc::now() + expires_in,
            },
        );
        self.persist(&entries)
    }

    fn delete(&self, key: &str) -> Result<(), CheckpointError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, CheckpointError> {
        let now = Utc::now();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
