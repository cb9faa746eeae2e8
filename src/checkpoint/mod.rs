//! Resume checkpoints
//!
//! A checkpoint records which chunk of a file was last handed to the server
//! together with the file's upload uuid, so that an interrupted upload can
//! continue after a restart. Checkpoints live in a small expiring key-value
//! store; the key identifies the file by name, size and chunk size (plus an
//! optional resume session id).
//!
//! # Key format
//!
//! ```text
//! qqfilechunk|<percent-encoded name>|<size>|<chunk size>[|<resume id>]  =>  <uuid>|<part index>
//! ```

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;
use thiserror::Error;

mod store;

pub use store::{CheckpointStore, FileStore, MemoryStore};

/// Prefix shared by every checkpoint key
pub const KEY_PREFIX: &str = "qqfilechunk";

const DELIMITER: char = '|';

/// Characters escaped in file names, matching `encodeURIComponent`
const NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// Identity of a resumable file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub name: String,
    pub size: u64,
    pub chunk_size: u64,
    pub resume_id: Option<String>,
}

impl CheckpointKey {
    /// Encode to the store key
    pub fn encode(&self) -> String {
        let mut key = format!(
            "{KEY_PREFIX}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            utf8_percent_encode(&self.name, NAME_ENCODE_SET),
            self.size,
            self.chunk_size
        );
        if let Some(ref id) = self.resume_id {
            key.push(DELIMITER);
            key.push_str(id);
        }
        key
    }

    /// Decode a store key, `None` for anything that is not a checkpoint key
    pub fn decode(key: &str) -> Option<Self> {
        let mut parts = key.split(DELIMITER);
        if parts.next()? != KEY_PREFIX {
            return None;
        }
        let name = percent_decode_str(parts.next()?).decode_utf8().ok()?.into_owned();
        let size = parts.next()?.parse().ok()?;
        let chunk_size = parts.next()?.parse().ok()?;
        let resume_id = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            name,
            size,
            chunk_size,
            resume_id,
        })
    }
}

/// Persisted progress of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCheckpoint {
    pub uuid: String,
    pub part: u64,
}

impl ResumeCheckpoint {
    pub fn encode(&self) -> String {
        format!("{}{DELIMITER}{}", self.uuid, self.part)
    }

    pub fn decode(value: &str) -> Option<Self> {
        let (uuid, part) = value.split_once(DELIMITER)?;
        if uuid.is_empty() {
            return None;
        }
        Some(Self {
            uuid: uuid.to_string(),
            part: part.trim().parse().ok()?,
        })
    }
}

/// A file that can be resumed, as reported by [`Checkpoints::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableFile {
    pub name: String,
    pub size: u64,
    pub uuid: String,
    pub part_index: u64,
}

/// Checkpoint access bound to one chunk size and resume id
#[derive(Clone)]
pub struct Checkpoints {
    store: Arc<dyn CheckpointStore>,
    chunk_size: u64,
    resume_id: Option<String>,
    expiry: chrono::Duration,
}

impl Checkpoints {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        chunk_size: u64,
        resume_id: Option<String>,
        expiry_days: u32,
    ) -> Self {
        Self {
            store,
            chunk_size,
            resume_id,
            expiry: chrono::Duration::days(i64::from(expiry_days)),
        }
    }

    fn key(&self, name: &str, size: u64) -> String {
        CheckpointKey {
            name: name.to_string(),
            size,
            chunk_size: self.chunk_size,
            resume_id: self.resume_id.clone(),
        }
        .encode()
    }

    /// Checkpoint for a file, if one was persisted and is still readable
    pub fn load(&self, name: &str, size: u64) -> Result<Option<ResumeCheckpoint>, CheckpointError> {
        let value = self.store.get(&self.key(name, size))?;
        Ok(value.as_deref().and_then(ResumeCheckpoint::decode))
    }

    /// Record that chunk `part` of the file is about to be sent
    pub fn save(&self, name: &str, size: u64, checkpoint: &ResumeCheckpoint) -> Result<(), CheckpointError> {
        self.store
            .set(&self.key(name, size), &checkpoint.encode(), self.expiry)
    }

    pub fn clear(&self, name: &str, size: u64) -> Result<(), CheckpointError> {
        self.store.delete(&self.key(name, size))
    }

    /// Every resumable file persisted for this chunk size and resume id
    pub fn list(&self) -> Result<Vec<ResumableFile>, CheckpointError> {
        let mut files = Vec::new();
        for key in self.store.keys()? {
            let Some(decoded) = CheckpointKey::decode(&key) else {
                continue;
            };
            if decoded.chunk_size != self.chunk_size || decoded.resume_id != self.resume_id {
                continue;
            }
            let Some(checkpoint) = self.store.get(&key)?.as_deref().and_then(ResumeCheckpoint::decode)
            else {
                continue;
            };
            files.push(ResumableFile {
                name: decoded.name,
                size: decoded.size,
                uuid: checkpoint.uuid,
                part_index: checkpoint.part,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}
