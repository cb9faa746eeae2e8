//! Single-owner upload engine
//!
//! The engine task owns every piece of mutable upload state. It reacts to
//! two streams: commands from [`Uploader`](super::Uploader) handles, and
//! events from the tasks it spawned (request progress, request outcome,
//! retry timer expiry). Each message is handled to completion before the
//! next one is read, so callbacks always observe a consistent state.

use super::{Command, Query};
use crate::callbacks::SafeCallbacks;
use crate::checkpoint::{Checkpoints, ResumableFile, ResumeCheckpoint};
use crate::config::{ChunkParamNames, Config, RequestConfig};
use crate::metrics;
use crate::transport::{
    ProgressFn, SendRequest, Transport, TransportError, TransportResponse,
};
use crate::upload::chunk::{total_chunks, ChunkData};
use crate::upload::params::{EndpointStore, Params, ParamsStore};
use crate::upload::queue::AdmissionQueue;
use crate::upload::response::UploadResponse;
use crate::upload::retry::RetryController;
use crate::upload::source::FileSource;
use crate::upload::state::{FileRecord, FileStatus, InFlight};
use crate::upload::validation::{FileDescriptor, Validator};
use crate::upload::FileId;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Messages from spawned tasks back to the engine
#[derive(Debug)]
pub(crate) enum Event {
    Progress {
        id: FileId,
        seq: u64,
        sent: u64,
    },
    Response {
        id: FileId,
        seq: u64,
        result: Result<TransportResponse, TransportError>,
    },
    RetryDue {
        id: FileId,
        token: u64,
    },
}

/// Chunked mode settings, present only when chunking is active
#[derive(Debug, Clone)]
struct Chunking {
    part_size: u64,
    names: ChunkParamNames,
}

pub(crate) struct Engine {
    request: RequestConfig,
    auto_upload: bool,
    chunking: Option<Chunking>,
    resume_enabled: bool,
    resume_param: String,
    prevent_property: String,

    transport: Arc<dyn Transport>,
    callbacks: SafeCallbacks,
    validator: Validator,
    checkpoints: Checkpoints,

    files: HashMap<FileId, FileRecord>,
    queue: AdmissionQueue,
    retry: RetryController,
    params: ParamsStore,
    endpoints: EndpointStore,
    in_progress: Vec<FileId>,
    stored: VecDeque<FileId>,

    next_id: u64,
    next_seq: u64,

    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    busy: watch::Sender<usize>,
}

impl Engine {
    pub(crate) fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        callbacks: SafeCallbacks,
        checkpoints: Checkpoints,
        commands: mpsc::UnboundedReceiver<Command>,
        busy: watch::Sender<usize>,
    ) -> Self {
        let chunking = (config.chunking.enabled && transport.supports_chunking()).then(|| {
            Chunking {
                part_size: config.chunking.part_size,
                names: config.chunking.param_names.clone(),
            }
        });
        if config.chunking.enabled && chunking.is_none() {
            warn!("Chunking is enabled but the transport cannot send chunks, uploading whole files");
        }
        let resume_enabled = config.resume.enabled && chunking.is_some();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            auto_upload: config.auto_upload,
            chunking,
            resume_enabled,
            resume_param: config.resume.param_names.resuming.clone(),
            prevent_property: config.retry.prevent_retry_response_property.clone(),
            transport,
            callbacks,
            validator: Validator::new(config.validation.clone(), config.messages.clone()),
            checkpoints,
            files: HashMap::new(),
            queue: AdmissionQueue::new(config.max_connections),
            retry: RetryController::new(&config.retry),
            params: ParamsStore::new(config.request.params.clone()),
            endpoints: EndpointStore::new(config.request.endpoint.clone()),
            in_progress: Vec::new(),
            stored: VecDeque::new(),
            next_id: 0,
            next_seq: 0,
            commands,
            events_tx,
            events_rx,
            busy,
            request: config.request,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Upload engine started");
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
            self.publish();
        }
        self.shutdown();
        debug!("Upload engine stopped");
    }

    fn shutdown(&mut self) {
        for record in self.files.values_mut() {
            record.abort_in_flight();
        }
        self.retry.reset();
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddFiles { files, reply } => {
                let ids = self.add_files(files);
                self.reply(reply, ids);
            }
            Command::UploadStored { reply } => {
                self.upload_stored_files();
                self.reply(reply, ());
            }
            Command::ClearStored { reply } => {
                self.stored.clear();
                self.reply(reply, ());
            }
            Command::Retry { id, reply } => {
                let accepted = self.manual_retry(id);
                self.reply(reply, accepted);
            }
            Command::Cancel { id, reply } => {
                self.cancel(id);
                self.reply(reply, ());
            }
            Command::CancelAll { reply } => {
                self.cancel_all();
                self.reply(reply, ());
            }
            Command::Reset { reply } => {
                self.reset();
                self.reply(reply, ());
            }
            Command::SetParams { params, id, reply } => {
                self.params.set(params, id);
                self.reply(reply, ());
            }
            Command::SetEndpoint { endpoint, id, reply } => {
                self.endpoints.set(endpoint, id);
                self.reply(reply, ());
            }
            Command::Query(query) => self.answer(query),
        }
    }

    /// Answer a command. The queue length is published first.
    fn reply<T>(&self, reply: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = reply.send(value);
    }

    fn publish(&self) {
        self.busy.send_replace(self.queue.len());
    }

    fn answer(&mut self, query: Query) {
        match query {
            Query::InProgress(reply) => self.reply(reply, self.in_progress.len()),
            Query::Name(id, reply) => {
                let name = self.files.get(&id).map(|r| r.name().to_string());
                self.reply(reply, name);
            }
            Query::Size(id, reply) => {
                let size = self.files.get(&id).map(FileRecord::size);
                self.reply(reply, size);
            }
            Query::Uuid(id, reply) => {
                let uuid = self.files.get(&id).map(|r| r.uuid.clone());
                self.reply(reply, uuid);
            }
            Query::IsValid(id, reply) => self.reply(reply, self.files.contains_key(&id)),
            Query::Status(id, reply) => {
                let status = self.files.get(&id).map(|r| r.status);
                self.reply(reply, status);
            }
            Query::Resumable(reply) => {
                let files = self.resumable_files();
                self.reply(reply, files);
            }
        }
    }

    fn resumable_files(&self) -> Result<Vec<ResumableFile>, crate::checkpoint::CheckpointError> {
        if !self.resume_enabled {
            return Ok(Vec::new());
        }
        self.checkpoints.list()
    }

    fn add_files(&mut self, sources: Vec<FileSource>) -> Vec<FileId> {
        let descriptors: Vec<FileDescriptor> = sources
            .iter()
            .map(|s| FileDescriptor {
                name: s.name().to_string(),
                size: s.size(),
            })
            .collect();

        if !self.callbacks.on_validate_batch(&descriptors) {
            debug!(files = descriptors.len(), "Batch rejected by validation callback");
            return Vec::new();
        }

        if sources.is_empty() {
            let message = self.validator.no_files_message();
            self.callbacks.on_error(None, "", &message);
            return Vec::new();
        }

        info!(files = sources.len(), "Processing files");
        let mut ids = Vec::new();
        for (source, descriptor) in sources.into_iter().zip(descriptors) {
            if self.validate(&descriptor) {
                ids.push(self.submit(source));
            } else if self.validator.stop_on_first_invalid() {
                break;
            }
        }
        ids
    }

    fn validate(&mut self, file: &FileDescriptor) -> bool {
        if !self.callbacks.on_validate(file) {
            return false;
        }
        match self.validator.check(file) {
            Ok(()) => true,
            Err(rejection) => {
                let message = self.validator.message(rejection, &file.name);
                warn!(file = %file.name, size = file.size, reason = rejection.as_str(), "File rejected");
                metrics::record_error(rejection.as_str());
                self.callbacks.on_error(None, &file.name, &message);
                false
            }
        }
    }

    fn submit(&mut self, source: FileSource) -> FileId {
        let id = FileId::new(self.next_id);
        self.next_id += 1;

        let name = source.name().to_string();
        let record = FileRecord::new(id, Arc::new(source));
        debug!(file_id = %id, file = %name, uuid = %record.uuid, "File added");
        self.files.insert(id, record);

        if !self.callbacks.on_submit(id, &name) {
            debug!(file_id = %id, "Submission vetoed by callback");
            return id;
        }

        if self.auto_upload {
            self.in_progress.push(id);
            self.upload(id);
        } else {
            self.set_status(id, FileStatus::Stored);
            self.stored.push_back(id);
        }
        id
    }

    fn upload_stored_files(&mut self) {
        while let Some(id) = self.stored.pop_front() {
            self.in_progress.push(id);
            self.upload(id);
        }
    }

    fn manual_retry(&mut self, id: FileId) -> bool {
        if self.retry.is_prevented(id) {
            warn!(file_id = %id, "Retries are forbidden for this file");
            return false;
        }
        let Some(record) = self.files.get(&id) else {
            error!(file_id = %id, "Not a valid file id");
            return false;
        };
        if !matches!(record.status, FileStatus::Failed | FileStatus::AwaitingRetry) {
            warn!(file_id = %id, status = ?record.status, "Only failed uploads can be retried");
            return false;
        }
        let name = record.name().to_string();

        if !self.callbacks.on_manual_retry(id, &name) {
            return false;
        }
        if self.retry.cancel_timer(id) {
            debug!(file_id = %id, "Cancelled pending automatic retry");
        }

        info!(file_id = %id, file = %name, "Retrying upload");
        if !self.in_progress.contains(&id) {
            self.in_progress.push(id);
        }
        self.queue_retry(id);
        true
    }

    fn cancel(&mut self, id: FileId) {
        let Some(mut record) = self.files.remove(&id) else {
            debug!(file_id = %id, "Cancel ignored, file is not tracked");
            return;
        };
        info!(file_id = %id, file = %record.name(), "Cancelling upload");

        self.params.remove(id);
        self.endpoints.remove(id);
        self.remove_in_progress(id);
        self.retry.cancel_timer(id);
        self.stored.retain(|&stored| stored != id);

        self.callbacks.on_cancel(id, record.name());
        record.abort_in_flight();
        if self.resume_enabled {
            self.clear_checkpoint(record.name(), record.size());
        }
        metrics::record_upload_cancelled();

        self.dequeue(id);
    }

    /// Cancel every queued file. The queue is emptied first so no waiting
    /// file is promoted and started while its predecessors are cancelled.
    fn cancel_all(&mut self) {
        for id in self.queue.drain() {
            self.cancel(id);
        }
    }

    fn reset(&mut self) {
        info!(files = self.files.len(), "Resetting uploader");
        for record in self.files.values_mut() {
            record.abort_in_flight();
        }
        self.files.clear();
        self.queue.clear();
        self.in_progress.clear();
        self.stored.clear();
        self.retry.reset();
        self.params.reset();
        self.endpoints.reset();
    }

    // ========================================================================
    // Admission
    // ========================================================================

    fn upload(&mut self, id: FileId) {
        self.set_status(id, FileStatus::Queued);
        if self.queue.push(id) {
            self.start(id, false);
        } else {
            debug!(file_id = %id, queued = self.queue.len(), "Waiting for a free connection");
        }
    }

    /// Re-enter the slot the file still holds, or queue it afresh
    fn queue_retry(&mut self, id: FileId) {
        if self.queue.contains(id) {
            self.start(id, true);
        } else {
            self.upload(id);
        }
    }

    fn dequeue(&mut self, id: FileId) {
        if let Some(next) = self.queue.remove(id) {
            self.start(next, false);
        }
    }

    fn remove_in_progress(&mut self, id: FileId) {
        self.in_progress.retain(|&current| current != id);
    }

    fn set_status(&mut self, id: FileId, status: FileStatus) {
        if let Some(record) = self.files.get_mut(&id) {
            record.status = status;
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    fn start(&mut self, id: FileId, retry: bool) {
        let Some(record) = self.files.get_mut(&id) else {
            return;
        };
        record.status = FileStatus::Uploading;
        record.started_at.get_or_insert_with(Instant::now);
        let name = record.name().to_string();

        self.callbacks.on_upload(id, &name);

        if self.chunking.is_some() {
            self.start_chunked(id, retry);
        } else {
            self.send_whole(id);
        }
    }

    fn start_chunked(&mut self, id: FileId, retry: bool) {
        let Some(part_size) = self.chunking.as_ref().map(|c| c.part_size) else {
            return;
        };
        let Some(record) = self.files.get(&id) else {
            return;
        };
        if record.remaining.is_empty() {
            let (name, size) = (record.name().to_string(), record.size());
            let resume_from = if self.resume_enabled && !retry {
                self.resume_point(id, &name, size, part_size)
            } else {
                None
            };

            let Some(record) = self.files.get_mut(&id) else {
                return;
            };
            match resume_from {
                Some((checkpoint, chunk)) => {
                    info!(file_id = %id, file = %name, part_index = checkpoint.part, "Resuming upload");
                    metrics::record_resume();
                    record.uuid = checkpoint.uuid;
                    record.loaded = chunk.start;
                    record.attempting_resume = true;
                    record.plan_from(checkpoint.part, part_size);
                }
                None => {
                    record.loaded = 0;
                    record.plan_from(0, part_size);
                }
            }
        }
        self.send_next_chunk(id);
    }

    /// Checkpoint to continue from, if one exists and the callback agrees
    fn resume_point(
        &mut self,
        id: FileId,
        name: &str,
        size: u64,
        part_size: u64,
    ) -> Option<(ResumeCheckpoint, ChunkData)> {
        let checkpoint = match self.checkpoints.load(name, size) {
            Ok(checkpoint) => checkpoint?,
            Err(e) => {
                warn!(file_id = %id, error = %e, "Failed to read checkpoint");
                metrics::record_error("checkpoint");
                return None;
            }
        };
        if checkpoint.part >= total_chunks(size, part_size) {
            warn!(file_id = %id, part_index = checkpoint.part, "Ignoring checkpoint past the last chunk");
            return None;
        }
        let chunk = ChunkData::new(checkpoint.part, size, part_size);
        if !self.callbacks.on_resume(id, name, &chunk.info()) {
            debug!(file_id = %id, "Resume declined by callback");
            return None;
        }
        Some((checkpoint, chunk))
    }

    fn send_next_chunk(&mut self, id: FileId) {
        let Some(chunking) = self.chunking.clone() else {
            return;
        };
        let Some(record) = self.files.get(&id) else {
            return;
        };
        let Some(&part) = record.remaining.front() else {
            return;
        };
        let (name, size) = (record.name().to_string(), record.size());
        let (uuid, attempting_resume) = (record.uuid.clone(), record.attempting_resume);
        let chunk = ChunkData::new(part, size, chunking.part_size);

        if self.resume_enabled {
            let checkpoint = ResumeCheckpoint { uuid, part };
            if let Err(e) = self.checkpoints.save(&name, size, &checkpoint) {
                warn!(file_id = %id, error = %e, "Failed to persist checkpoint");
                metrics::record_error("checkpoint");
            }
        }

        self.callbacks.on_upload_chunk(id, &name, &chunk.info());

        let mut params = self.params.get(id);
        let names = &chunking.names;
        params.insert(names.part_index.clone(), chunk.part.to_string());
        params.insert(names.part_byte_offset.clone(), chunk.start.to_string());
        params.insert(names.chunk_size.clone(), chunk.len().to_string());
        params.insert(names.total_parts.clone(), chunk.count.to_string());
        params.insert(self.request.total_file_size_name.clone(), size.to_string());
        if self.request.multipart() {
            params.insert(names.filename.clone(), name.clone());
        }
        if attempting_resume {
            params.insert(self.resume_param.clone(), "true".to_string());
        }

        debug!(
            file_id = %id,
            part_index = part,
            "Sending chunk: bytes {}-{} of {}",
            chunk.start + 1,
            chunk.end,
            size
        );
        self.dispatch(id, chunk.start..chunk.end, params, true);
    }

    fn send_whole(&mut self, id: FileId) {
        let Some(record) = self.files.get_mut(&id) else {
            return;
        };
        record.loaded = 0;
        let size = record.size();
        let params = self.params.get(id);
        debug!(file_id = %id, bytes = size, "Sending upload request");
        self.dispatch(id, 0..size, params, false);
    }

    /// Spawn the request task and remember it as the file's in-flight send
    fn dispatch(&mut self, id: FileId, range: Range<u64>, params: Params, chunked: bool) {
        let seq = self.next_seq();
        let Some(record) = self.files.get_mut(&id) else {
            return;
        };

        let request = SendRequest {
            file_id: id,
            endpoint: self.endpoints.get(id).to_string(),
            uuid: record.uuid.clone(),
            source: record.source.clone(),
            range,
            params,
            chunked,
        };
        let len = request.len();

        let progress_tx = self.events_tx.clone();
        let progress: ProgressFn = Arc::new(move |sent| {
            let _ = progress_tx.send(Event::Progress { id, seq, sent });
        });
        let events = self.events_tx.clone();
        let transport = self.transport.clone();
        let task = tokio::spawn(async move {
            let result = transport.send(request, progress).await;
            let _ = events.send(Event::Response { id, seq, result });
        });

        record.in_flight = Some(InFlight {
            seq,
            len,
            abort: self.transport.supports_abort().then(|| task.abort_handle()),
        });
    }

    // ========================================================================
    // Events
    // ========================================================================

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Progress { id, seq, sent } => self.on_progress(id, seq, sent),
            Event::Response { id, seq, result } => self.on_response(id, seq, result),
            Event::RetryDue { id, token } => self.on_retry_due(id, token),
        }
    }

    fn on_progress(&mut self, id: FileId, seq: u64, sent: u64) {
        let Some(record) = self.files.get(&id) else {
            return;
        };
        if !record.is_current(seq) {
            return;
        }
        let (name, size, loaded) = (record.name().to_string(), record.size(), record.loaded);

        if self.chunking.is_some() {
            if loaded < size {
                self.callbacks.on_progress(id, &name, loaded + sent, size);
            }
        } else {
            self.callbacks.on_progress(id, &name, sent, size);
        }
    }

    fn on_response(
        &mut self,
        id: FileId,
        seq: u64,
        result: Result<TransportResponse, TransportError>,
    ) {
        let Some(record) = self.files.get_mut(&id) else {
            debug!(file_id = %id, "Discarding response for a cancelled file");
            return;
        };
        if !record.is_current(seq) {
            debug!(file_id = %id, seq, "Discarding stale response");
            return;
        }
        let sent = record.in_flight.take().map(|f| f.len).unwrap_or(0);
        let attempting_resume = record.attempting_resume;

        let response = match result {
            Ok(raw) => {
                debug!(file_id = %id, status = raw.status, body = %raw.body, "Server response received");
                UploadResponse::parse(raw.status, &raw.body, &self.prevent_property)
            }
            Err(e) => {
                warn!(file_id = %id, error = %e, "Upload request failed");
                metrics::record_error("transport");
                UploadResponse::transport_failure(e.to_string())
            }
        };
        metrics::record_chunk(sent, !response.is_error());

        if response.is_error() {
            if response.reset {
                self.discard_chunk_progress(id);
            }
            if attempting_resume && response.reset {
                if let Some(record) = self.files.get_mut(&id) {
                    record.attempting_resume = false;
                }
                error!(file_id = %id, "Server cannot resume this file, starting from the first chunk");
                self.start(id, true);
            } else {
                self.handle_failure(id, response);
            }
        } else if self.chunking.is_some() {
            self.chunk_acked(id, response);
        } else {
            self.complete(id, response);
        }
    }

    fn discard_chunk_progress(&mut self, id: FileId) {
        let Some(record) = self.files.get_mut(&id) else {
            return;
        };
        error!(file_id = %id, "Server ordered the upload to restart on the next attempt");
        record.discard_progress();
        let (name, size) = (record.name().to_string(), record.size());
        if self.resume_enabled {
            self.clear_checkpoint(&name, size);
        }
    }

    fn chunk_acked(&mut self, id: FileId, response: UploadResponse) {
        let Some(part_size) = self.chunking.as_ref().map(|c| c.part_size) else {
            return;
        };
        let Some(record) = self.files.get_mut(&id) else {
            return;
        };
        let Some(part) = record.remaining.pop_front() else {
            return;
        };
        let chunk = ChunkData::new(part, record.size(), part_size);
        record.attempting_resume = false;
        record.loaded += chunk.len();

        if !record.remaining.is_empty() {
            self.send_next_chunk(id);
        } else {
            let (name, size) = (record.name().to_string(), record.size());
            if self.resume_enabled {
                self.clear_checkpoint(&name, size);
            }
            self.complete(id, response);
        }
    }

    fn handle_failure(&mut self, id: FileId, response: UploadResponse) {
        self.retry.set_prevented(id, response.prevent_retry);

        if !self.retry.should_auto_retry(id) {
            self.complete(id, response);
            return;
        }

        let Some(record) = self.files.get_mut(&id) else {
            return;
        };
        record.status = FileStatus::AwaitingRetry;
        let name = record.name().to_string();

        if let Some(reason) = response.failure_reason() {
            self.callbacks.on_error(Some(id), &name, &reason);
        }
        let attempt = self.retry.attempts(id) + 1;
        self.callbacks.on_auto_retry(id, &name, attempt);

        let delay = self.retry.delay();
        info!(file_id = %id, file = %name, attempt, "Waiting {:?} before retrying", delay);
        metrics::record_auto_retry();

        let token = self.next_seq();
        let events = self.events_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::RetryDue { id, token });
        });
        self.retry.set_timer(id, token, timer.abort_handle());
    }

    fn on_retry_due(&mut self, id: FileId, token: u64) {
        if !self.retry.take_due(id, token) || !self.files.contains_key(&id) {
            return;
        }
        info!(file_id = %id, "Retrying upload");
        self.retry.record_attempt(id);
        self.queue_retry(id);
    }

    /// Terminal outcome of a file: report it, free its slot, promote the next
    fn complete(&mut self, id: FileId, response: UploadResponse) {
        let Some(record) = self.files.get_mut(&id) else {
            return;
        };
        let success = !response.is_error();
        record.attempting_resume = false;
        record.in_flight = None;
        record.status = if success {
            FileStatus::Succeeded
        } else {
            FileStatus::Failed
        };
        let elapsed = record
            .started_at
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();
        let (name, size) = (record.name().to_string(), record.size());

        if success {
            info!(file_id = %id, file = %name, bytes = size, "Upload complete");
            metrics::record_upload_success(elapsed);
            self.callbacks.on_progress(id, &name, size, size);
        } else {
            warn!(file_id = %id, file = %name, reason = ?response.failure_reason(), "Upload failed");
            metrics::record_upload_failure(elapsed);
        }

        self.remove_in_progress(id);
        if let Some(reason) = response.failure_reason() {
            self.callbacks.on_error(Some(id), &name, &reason);
        }
        self.callbacks.on_complete(id, &name, &response);

        self.retry.cancel_timer(id);
        self.dequeue(id);
    }

    fn clear_checkpoint(&self, name: &str, size: u64) {
        if let Err(e) = self.checkpoints.clear(name, size) {
            warn!(file = %name, error = %e, "Failed to delete checkpoint");
            metrics::record_error("checkpoint");
        }
    }
}
