//! Caller callbacks
//!
//! [`UploadCallbacks`] is how callers observe the upload lifecycle. Every
//! method has a no-op default, so implementors only override what they need.
//! Methods returning `bool` can veto the step by returning `false`.
//!
//! The engine never calls a caller's implementation directly: it goes through
//! [`SafeCallbacks`], which catches panics, logs them, and substitutes the
//! method's default return value. A misbehaving callback therefore cannot
//! corrupt the engine's bookkeeping.

use crate::upload::chunk::ChunkInfo;
use crate::upload::response::UploadResponse;
use crate::upload::validation::FileDescriptor;
use crate::upload::FileId;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Upload lifecycle callbacks. All run on the engine task.
#[allow(unused_variables)]
pub trait UploadCallbacks: Send {
    /// A batch of files was handed to `add_files`. `false` rejects the whole batch.
    fn on_validate_batch(&mut self, files: &[FileDescriptor]) -> bool {
        true
    }

    /// One file is about to be validated. `false` rejects it silently.
    fn on_validate(&mut self, file: &FileDescriptor) -> bool {
        true
    }

    /// A file was accepted and given an id. `false` keeps it from uploading.
    fn on_submit(&mut self, id: FileId, name: &str) -> bool {
        true
    }

    /// An upload attempt is starting.
    fn on_upload(&mut self, id: FileId, name: &str) {}

    /// A chunk is about to be sent.
    fn on_upload_chunk(&mut self, id: FileId, name: &str, chunk: &ChunkInfo) {}

    /// A checkpoint was found. `false` restarts the file from its first chunk.
    fn on_resume(&mut self, id: FileId, name: &str, chunk: &ChunkInfo) -> bool {
        true
    }

    fn on_progress(&mut self, id: FileId, name: &str, loaded: u64, total: u64) {}

    /// Terminal outcome of a file, successful or not.
    fn on_complete(&mut self, id: FileId, name: &str, response: &UploadResponse) {}

    fn on_cancel(&mut self, id: FileId, name: &str) {}

    /// A validation error (`id` is `None`) or a failed attempt.
    fn on_error(&mut self, id: Option<FileId>, name: &str, reason: &str) {}

    /// An automatic retry was scheduled. `attempt` starts at 1.
    fn on_auto_retry(&mut self, id: FileId, name: &str, attempt: u32) {}

    /// A manual retry was requested. `false` refuses it.
    fn on_manual_retry(&mut self, id: FileId, name: &str) -> bool {
        true
    }
}

/// Callbacks that ignore everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl UploadCallbacks for NoopCallbacks {}

/// Panic-guarding wrapper around caller callbacks
pub struct SafeCallbacks {
    inner: Box<dyn UploadCallbacks>,
}

impl SafeCallbacks {
    pub fn new(inner: Box<dyn UploadCallbacks>) -> Self {
        Self { inner }
    }

    fn guard<T>(
        &mut self,
        name: &'static str,
        fallback: T,
        f: impl FnOnce(&mut dyn UploadCallbacks) -> T,
    ) -> T {
        let inner = self.inner.as_mut();
        match catch_unwind(AssertUnwindSafe(|| f(inner))) {
            Ok(value) => value,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(callback = name, panic = %message, "Caught panic in callback");
                crate::metrics::record_error("callback_panic");
                fallback
            }
        }
    }

    pub fn on_validate_batch(&mut self, files: &[FileDescriptor]) -> bool {
        self.guard("on_validate_batch", true, |cb| cb.on_validate_batch(files))
    }

    pub fn on_validate(&mut self, file: &FileDescriptor) -> bool {
        self.guard("on_validate", true, |cb| cb.on_validate(file))
    }

    pub fn on_submit(&mut self, id: FileId, name: &str) -> bool {
        self.guard("on_submit", true, |cb| cb.on_submit(id, name))
    }

    pub fn on_upload(&mut self, id: FileId, name: &str) {
        self.guard("on_upload", (), |cb| cb.on_upload(id, name))
    }

    pub fn on_upload_chunk(&mut self, id: FileId, name: &str, chunk: &ChunkInfo) {
        self.guard("on_upload_chunk", (), |cb| cb.on_upload_chunk(id, name, chunk))
    }

    pub fn on_resume(&mut self, id: FileId, name: &str, chunk: &ChunkInfo) -> bool {
        self.guard("on_resume", true, |cb| cb.on_resume(id, name, chunk))
    }

    pub fn on_progress(&mut self, id: FileId, name: &str, loaded: u64, total: u64) {
        self.guard("on_progress", (), |cb| cb.on_progress(id, name, loaded, total))
    }

    pub fn on_complete(&mut self, id: FileId, name: &str, response: &UploadResponse) {
        self.guard("on_complete", (), |cb| cb.on_complete(id, name, response))
    }

    pub fn on_cancel(&mut self, id: FileId, name: &str) {
        self.guard("on_cancel", (), |cb| cb.on_cancel(id, name))
    }

    pub fn on_error(&mut self, id: Option<FileId>, name: &str, reason: &str) {
        self.guard("on_error", (), |cb| cb.on_error(id, name, reason))
    }

    pub fn on_auto_retry(&mut self, id: FileId, name: &str, attempt: u32) {
        self.guard("on_auto_retry", (), |cb| cb.on_auto_retry(id, name, attempt))
    }

    pub fn on_manual_retry(&mut self, id: FileId, name: &str) -> bool {
        self.guard("on_manual_retry", true, |cb| cb.on_manual_retry(id, name))
    }
}
