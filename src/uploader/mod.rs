//! Public upload facade
//!
//! [`Uploader`] is a cheap, cloneable handle to an upload engine running on
//! its own tokio task. Every method sends a command to the engine and waits
//! for it to be processed, so calls made from one task take effect in order.
//!
//! # Example
//!
//! ```no_run
//! use resumable_uploadr::callbacks::UploadCallbacks;
//! use resumable_uploadr::upload::{FileId, UploadResponse};
//! use resumable_uploadr::{Config, Uploader};
//!
//! struct Report;
//!
//! impl UploadCallbacks for Report {
//!     fn on_complete(&mut self, id: FileId, name: &str, response: &UploadResponse) {
//!         println!("{id} {name}: success={}", response.success);
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::with_endpoint("https://cms.example.com/api/v2/files/");
//! config.chunking.enabled = true;
//!
//! let uploader = Uploader::builder(config).callbacks(Report).build()?;
//! uploader.add_paths(["video.mp4"]).await?;
//! uploader.wait_idle().await?;
//! # Ok(())
//! # }
//! ```

use crate::callbacks::{NoopCallbacks, SafeCallbacks, UploadCallbacks};
use crate::checkpoint::{
    CheckpointError, CheckpointStore, Checkpoints, FileStore, MemoryStore, ResumableFile,
};
use crate::config::{Config, ConfigError};
use crate::transport::{self, Transport, TransportError};
use crate::upload::params::Params;
use crate::upload::source::{FileSource, SourceError};
use crate::upload::state::FileStatus;
use crate::upload::FileId;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

mod engine;

use engine::Engine;

/// Uploader errors
#[derive(Error, Debug)]
pub enum UploaderError {
    #[error("Upload engine has stopped")]
    EngineStopped,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("File error: {0}")]
    Source(#[from] SourceError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub(crate) enum Command {
    AddFiles {
        files: Vec<FileSource>,
        reply: oneshot::Sender<Vec<FileId>>,
    },
    UploadStored {
        reply: oneshot::Sender<()>,
    },
    ClearStored {
        reply: oneshot::Sender<()>,
    },
    Retry {
        id: FileId,
        reply: oneshot::Sender<bool>,
    },
    Cancel {
        id: FileId,
        reply: oneshot::Sender<()>,
    },
    CancelAll {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    SetParams {
        params: Params,
        id: Option<FileId>,
        reply: oneshot::Sender<()>,
    },
    SetEndpoint {
        endpoint: String,
        id: Option<FileId>,
        reply: oneshot::Sender<()>,
    },
    Query(Query),
}

pub(crate) enum Query {
    InProgress(oneshot::Sender<usize>),
    Name(FileId, oneshot::Sender<Option<String>>),
    Size(FileId, oneshot::Sender<Option<u64>>),
    Uuid(FileId, oneshot::Sender<Option<String>>),
    IsValid(FileId, oneshot::Sender<bool>),
    Status(FileId, oneshot::Sender<Option<FileStatus>>),
    Resumable(oneshot::Sender<Result<Vec<ResumableFile>, CheckpointError>>),
}

/// Builder for [`Uploader`]
pub struct UploaderBuilder {
    config: Config,
    callbacks: Option<Box<dyn UploadCallbacks>>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl UploaderBuilder {
    /// Set the lifecycle callbacks
    pub fn callbacks(mut self, callbacks: impl UploadCallbacks + 'static) -> Self {
        self.callbacks = Some(Box::new(callbacks));
        self
    }

    /// Use this transport instead of the one the configuration selects
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use this checkpoint store instead of the configured one
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and start the engine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Uploader, UploaderError> {
        let config = self.config;
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => transport::from_config(&config.request)?,
        };

        let store: Arc<dyn CheckpointStore> = match (self.store, &config.resume.store_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let checkpoints = Checkpoints::new(
            store,
            config.chunking.part_size,
            config.resume.id.clone(),
            config.resume.checkpoint_expiry_days,
        );

        let callbacks = SafeCallbacks::new(
            self.callbacks
                .unwrap_or_else(|| Box::new(NoopCallbacks)),
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (busy_tx, busy_rx) = watch::channel(0);

        tracing::info!(
            endpoint = %config.request.endpoint,
            transport = ?transport.kind(),
            max_connections = config.max_connections,
            chunking = config.chunking.enabled,
            resume = config.resume.enabled,
            "Starting uploader"
        );

        let engine = Engine::new(config, transport, callbacks, checkpoints, commands_rx, busy_tx);
        tokio::spawn(engine.run());

        Ok(Uploader {
            commands: commands_tx,
            busy: busy_rx,
        })
    }
}

/// Handle to a running upload engine. The engine stops once every handle
/// has been dropped.
#[derive(Clone)]
pub struct Uploader {
    commands: mpsc::UnboundedSender<Command>,
    busy: watch::Receiver<usize>,
}

impl Uploader {
    pub fn builder(config: Config) -> UploaderBuilder {
        UploaderBuilder {
            config,
            callbacks: None,
            transport: None,
            store: None,
        }
    }

    /// Start an uploader with no callbacks
    pub fn new(config: Config) -> Result<Self, UploaderError> {
        Self::builder(config).build()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, UploaderError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| UploaderError::EngineStopped)?;
        rx.await.map_err(|_| UploaderError::EngineStopped)
    }

    async fn query<T>(
        &self,
        query: impl FnOnce(oneshot::Sender<T>) -> Query,
    ) -> Result<T, UploaderError> {
        self.request(|tx| Command::Query(query(tx))).await
    }

    /// Validate and submit files. Returns the ids of the accepted files in
    /// submission order; rejected files are reported through `on_error`.
    pub async fn add_files(&self, files: Vec<FileSource>) -> Result<Vec<FileId>, UploaderError> {
        self.request(|reply| Command::AddFiles { files, reply }).await
    }

    /// Open files on disk and submit them
    pub async fn add_paths<I, P>(&self, paths: I) -> Result<Vec<FileId>, UploaderError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut files = Vec::new();
        for path in paths {
            files.push(FileSource::from_path(path).await?);
        }
        self.add_files(files).await
    }

    /// Start every file stored while `auto_upload` was off
    pub async fn upload_stored_files(&self) -> Result<(), UploaderError> {
        self.request(|reply| Command::UploadStored { reply }).await
    }

    pub async fn clear_stored_files(&self) -> Result<(), UploaderError> {
        self.request(|reply| Command::ClearStored { reply }).await
    }

    /// Retry a failed upload. `false` when the retry was refused.
    pub async fn retry(&self, id: FileId) -> Result<bool, UploaderError> {
        self.request(|reply| Command::Retry { id, reply }).await
    }

    /// Cancel a file. Unknown ids are ignored.
    pub async fn cancel(&self, id: FileId) -> Result<(), UploaderError> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    /// Cancel every queued or uploading file
    pub async fn cancel_all(&self) -> Result<(), UploaderError> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    /// Forget every file, counter and per-file setting. Ids are not reused.
    pub async fn reset(&self) -> Result<(), UploaderError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Replace the global parameters (`id: None`) or those of one file
    pub async fn set_params(&self, params: Params, id: Option<FileId>) -> Result<(), UploaderError> {
        self.request(|reply| Command::SetParams { params, id, reply })
            .await
    }

    /// Replace the global endpoint (`id: None`) or that of one file
    pub async fn set_endpoint(
        &self,
        endpoint: impl Into<String>,
        id: Option<FileId>,
    ) -> Result<(), UploaderError> {
        let endpoint = endpoint.into();
        self.request(|reply| Command::SetEndpoint { endpoint, id, reply })
            .await
    }

    /// Number of files submitted for upload that have not finished
    pub async fn get_in_progress(&self) -> Result<usize, UploaderError> {
        self.query(Query::InProgress).await
    }

    pub async fn get_name(&self, id: FileId) -> Result<Option<String>, UploaderError> {
        self.query(|tx| Query::Name(id, tx)).await
    }

    pub async fn get_size(&self, id: FileId) -> Result<Option<u64>, UploaderError> {
        self.query(|tx| Query::Size(id, tx)).await
    }

    pub async fn get_uuid(&self, id: FileId) -> Result<Option<String>, UploaderError> {
        self.query(|tx| Query::Uuid(id, tx)).await
    }

    /// Whether `id` names a file the uploader still tracks
    pub async fn is_valid(&self, id: FileId) -> Result<bool, UploaderError> {
        self.query(|tx| Query::IsValid(id, tx)).await
    }

    pub async fn status(&self, id: FileId) -> Result<Option<FileStatus>, UploaderError> {
        self.query(|tx| Query::Status(id, tx)).await
    }

    /// Files with a persisted checkpoint for the configured chunk size
    pub async fn get_resumable_files(&self) -> Result<Vec<ResumableFile>, UploaderError> {
        Ok(self.query(Query::Resumable).await??)
    }

    /// Wait until no file is queued, uploading, or waiting for a retry
    pub async fn wait_idle(&self) -> Result<(), UploaderError> {
        let mut busy = self.busy.clone();
        busy.wait_for(|&queued| queued == 0)
            .await
            .map_err(|_| UploaderError::EngineStopped)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_ok, block_on};

    #[test]
    fn test_build_rejects_invalid_config() {
        block_on(async {
            let result = Uploader::new(Config::with_endpoint("ftp://uploads.example.com/"));
            assert!(matches!(result, Err(UploaderError::Config(_))));
        });
    }

    #[test]
    fn test_clones_share_one_engine() {
        block_on(async {
            let mut config = Config::with_endpoint("https://uploads.example.com/");
            config.auto_upload = false;
            let Ok(first) = Uploader::new(config) else {
                panic!("uploader should start");
            };
            let second = first.clone();

            let ids = assert_ok!(
                first
                    .add_files(vec![FileSource::from_bytes("a.txt", b"abc".to_vec())])
                    .await
            );
            assert_eq!(assert_ok!(second.get_name(ids[0]).await).as_deref(), Some("a.txt"));
            assert_eq!(
                assert_ok!(second.status(ids[0]).await),
                Some(FileStatus::Stored)
            );
            assert_ok!(second.wait_idle().await);
        });
    }
}
