//! Per-file upload state

use super::chunk::total_chunks;
use super::source::FileSource;
use super::FileId;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::AbortHandle;

/// Where a file is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Accepted, but the submit callback kept it from uploading
    Submitted,
    /// Waiting for `upload_stored_files`
    Stored,
    /// Waiting for an admission slot
    Queued,
    /// Holds a slot and is sending
    Uploading,
    /// Holds a slot and waits for an automatic retry
    AwaitingRetry,
    Succeeded,
    Failed,
}

/// The request currently outstanding for a file
#[derive(Debug)]
pub struct InFlight {
    /// Attempt sequence number; events carrying another number are stale
    pub seq: u64,
    /// Byte length of what is being sent
    pub len: u64,
    pub abort: Option<AbortHandle>,
}

/// Everything the engine knows about one submitted file
#[derive(Debug)]
pub struct FileRecord {
    pub id: FileId,
    pub source: Arc<FileSource>,
    pub uuid: String,
    /// Bytes acknowledged by the server in the current attempt
    pub loaded: u64,
    /// Chunk indices still to send, front first
    pub remaining: VecDeque<u64>,
    pub attempting_resume: bool,
    pub status: FileStatus,
    pub in_flight: Option<InFlight>,
    pub started_at: Option<Instant>,
}

impl FileRecord {
    pub fn new(id: FileId, source: Arc<FileSource>) -> Self {
        Self {
            id,
            source,
            uuid: uuid::Uuid::new_v4().to_string(),
            loaded: 0,
            remaining: VecDeque::new(),
            attempting_resume: false,
            status: FileStatus::Submitted,
            in_flight: None,
            started_at: None,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }

    /// Queue every chunk from `first` to the last one
    pub fn plan_from(&mut self, first: u64, chunk_size: u64) {
        let total = total_chunks(self.size(), chunk_size);
        self.remaining = (first..total).collect();
    }

    /// Forget chunk progress so the next attempt starts at chunk 0
    pub fn discard_progress(&mut self) {
        self.remaining.clear();
        self.loaded = 0;
    }

    /// Drop the outstanding request, aborting it when possible
    pub fn abort_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            if let Some(handle) = in_flight.abort {
                handle.abort();
            }
        }
    }

    /// Whether an event tagged with `seq` still belongs to this record
    pub fn is_current(&self, seq: u64) -> bool {
        self.in_flight.as_ref().is_some_and(|f| f.seq == seq)
    }
}
