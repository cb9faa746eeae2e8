//! Shared test infrastructure
//!
//! - [`ScriptedTransport`]: in-process transport replaying canned replies
//! - [`Recorder`]: callbacks that log every lifecycle step

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use resumable_uploadr::callbacks::UploadCallbacks;
use resumable_uploadr::transport::{
    ProgressFn, SendRequest, Transport, TransportError, TransportKind, TransportResponse,
};
use resumable_uploadr::upload::chunk::ChunkInfo;
use resumable_uploadr::upload::{FileDescriptor, FileId, UploadResponse};
use resumable_uploadr::upload::params::Params;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Notify;

pub const ENDPOINT: &str = "http://uploads.test/files/";

/// What the scripted server does with one request
#[derive(Clone)]
pub enum Reply {
    Json(u16, Value),
    /// Transport-level failure, no HTTP status
    Error(String),
    /// Reply once the notify fires
    Gated(Arc<Notify>, u16, Value),
    /// Never reply
    Hang,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Json(200, json!({ "success": true }))
    }

    pub fn fail(error: &str) -> Self {
        Reply::Json(200, json!({ "success": false, "error": error }))
    }
}

/// A request as the transport saw it
#[derive(Debug, Clone)]
pub struct Sent {
    pub file_id: FileId,
    pub endpoint: String,
    pub uuid: String,
    pub range: Range<u64>,
    pub params: Params,
    pub chunked: bool,
}

impl Sent {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    sent: Mutex<Vec<Sent>>,
    chunking: bool,
    abortable: bool,
}

impl ScriptedTransport {
    /// Binary-like transport answering `script` in order, then success
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Self::build(script, Reply::ok(), true, true)
    }

    /// Answers every request with `reply`
    pub fn always(reply: Reply) -> Arc<Self> {
        Self::build(Vec::new(), reply, true, true)
    }

    /// Form-like transport: no chunking, no abort
    pub fn whole_file(script: Vec<Reply>) -> Arc<Self> {
        Self::build(script, Reply::ok(), false, false)
    }

    pub fn build(script: Vec<Reply>, fallback: Reply, chunking: bool, abortable: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            sent: Mutex::new(Vec::new()),
            chunking,
            abortable,
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sent_for(&self, id: FileId) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.file_id == id).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        if self.chunking {
            TransportKind::Binary
        } else {
            TransportKind::Form
        }
    }

    fn supports_chunking(&self) -> bool {
        self.chunking
    }

    fn supports_abort(&self) -> bool {
        self.abortable
    }

    async fn send(
        &self,
        request: SendRequest,
        progress: ProgressFn,
    ) -> Result<TransportResponse, TransportError> {
        let len = request.len();
        self.sent.lock().push(Sent {
            file_id: request.file_id,
            endpoint: request.endpoint.clone(),
            uuid: request.uuid.clone(),
            range: request.range.clone(),
            params: request.params.clone(),
            chunked: request.chunked,
        });
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let respond = |status: u16, body: Value| TransportResponse {
            status,
            body: body.to_string(),
        };
        match reply {
            Reply::Json(status, body) => {
                progress(len);
                Ok(respond(status, body))
            }
            Reply::Error(reason) => Err(TransportError::InvalidRequest(reason)),
            Reply::Gated(gate, status, body) => {
                gate.notified().await;
                progress(len);
                Ok(respond(status, body))
            }
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// One observed callback
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Submit(FileId),
    Upload(FileId),
    Chunk(FileId, u64),
    Resume(FileId, u64),
    Progress(FileId, u64, u64),
    Complete(FileId, bool),
    Cancel(FileId),
    Error(Option<FileId>, String, String),
    AutoRetry(FileId, u32),
    ManualRetry(FileId),
}

/// Recording callbacks with optional vetoes
#[derive(Clone, Default)]
pub struct Recorder {
    pub log: Arc<Mutex<Vec<Seen>>>,
    pub refuse_manual_retry: bool,
    pub refuse_resume: bool,
    pub refuse_batch: bool,
    pub panic_on_upload: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.log.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Seen) -> bool) -> usize {
        self.log.lock().iter().filter(|s| pred(s)).count()
    }

    pub fn completions(&self, id: FileId) -> Vec<bool> {
        self.log
            .lock()
            .iter()
            .filter_map(|s| match s {
                Seen::Complete(seen, ok) if *seen == id => Some(*ok),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(Option<FileId>, String, String)> {
        self.log
            .lock()
            .iter()
            .filter_map(|s| match s {
                Seen::Error(id, name, reason) => Some((*id, name.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    fn push(&self, seen: Seen) {
        self.log.lock().push(seen);
    }
}

impl UploadCallbacks for Recorder {
    fn on_validate_batch(&mut self, _files: &[FileDescriptor]) -> bool {
        !self.refuse_batch
    }

    fn on_submit(&mut self, id: FileId, _name: &str) -> bool {
        self.push(Seen::Submit(id));
        true
    }

    fn on_upload(&mut self, id: FileId, _name: &str) {
        self.push(Seen::Upload(id));
        if self.panic_on_upload {
            panic!("on_upload exploded");
        }
    }

    fn on_upload_chunk(&mut self, id: FileId, _name: &str, chunk: &ChunkInfo) {
        self.push(Seen::Chunk(id, chunk.part_index));
    }

    fn on_resume(&mut self, id: FileId, _name: &str, chunk: &ChunkInfo) -> bool {
        self.push(Seen::Resume(id, chunk.part_index));
        !self.refuse_resume
    }

    fn on_progress(&mut self, id: FileId, _name: &str, loaded: u64, total: u64) {
        self.push(Seen::Progress(id, loaded, total));
    }

    fn on_complete(&mut self, id: FileId, _name: &str, response: &UploadResponse) {
        self.push(Seen::Complete(id, !response.is_error()));
    }

    fn on_cancel(&mut self, id: FileId, _name: &str) {
        self.push(Seen::Cancel(id));
    }

    fn on_error(&mut self, id: Option<FileId>, name: &str, reason: &str) {
        self.push(Seen::Error(id, name.to_string(), reason.to_string()));
    }

    fn on_auto_retry(&mut self, id: FileId, _name: &str, attempt: u32) {
        self.push(Seen::AutoRetry(id, attempt));
    }

    fn on_manual_retry(&mut self, id: FileId, _name: &str) -> bool {
        self.push(Seen::ManualRetry(id));
        !self.refuse_manual_retry
    }
}
