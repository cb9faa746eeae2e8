//! Transport module
//!
//! Moves file bytes to the server. Two strategies exist:
//!
//! - [`BinaryTransport`]: streamed requests carrying a byte range of the
//!   file. Supports chunking, resume, progress and abort.
//! - [`FormTransport`]: one multipart form submission per file. No chunking,
//!   no progress, and an outstanding request cannot be aborted.
//!
//! The strategy is chosen once, when the uploader is built, by
//! [`TransportKind::detect`].

use crate::config::{RequestConfig, TransportMode};
use crate::upload::params::Params;
use crate::upload::source::{FileSource, SourceError};
use crate::upload::FileId;
use async_trait::async_trait;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

mod binary;
mod form;

pub use binary::BinaryTransport;
pub use form::FormTransport;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to read file: {0}")]
    SourceError(#[from] SourceError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Which strategy is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Binary,
    Form,
}

impl TransportKind {
    /// Pick the strategy for this configuration.
    ///
    /// `auto` resolves to binary: a native HTTP client can always stream
    /// byte ranges.
    pub fn detect(config: &RequestConfig) -> Self {
        match config.transport {
            TransportMode::Form => TransportKind::Form,
            TransportMode::Binary | TransportMode::Auto => TransportKind::Binary,
        }
    }
}

/// Byte-level progress of one request. Called with the total bytes handed
/// to the HTTP client so far.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// One request: a chunk, or a whole file when `range` covers all of it
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub file_id: FileId,
    pub endpoint: String,
    pub uuid: String,
    pub source: Arc<FileSource>,
    pub range: Range<u64>,
    /// Caller parameters plus chunk and resume parameters
    pub params: Params,
    /// Whether `range` is one chunk of a chunked upload
    pub chunked: bool,
}

impl SendRequest {
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// What came back from the server, before interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// A strategy for sending file bytes
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Whether a file may be sent as a sequence of byte ranges
    fn supports_chunking(&self) -> bool;

    /// Whether dropping an outstanding request stops it
    fn supports_abort(&self) -> bool;

    async fn send(
        &self,
        request: SendRequest,
        progress: ProgressFn,
    ) -> Result<TransportResponse, TransportError>;
}

/// Build the transport selected for `config`
pub fn from_config(config: &RequestConfig) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match TransportKind::detect(config) {
        TransportKind::Binary => Arc::new(BinaryTransport::new(config.clone())?),
        TransportKind::Form => Arc::new(FormTransport::new(config.clone())?),
    };
    tracing::debug!(kind = ?transport.kind(), "Selected upload transport");
    Ok(transport)
}

pub(crate) fn build_client(config: &RequestConfig) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_seconds {
        builder = builder.timeout(std::time::Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

pub(crate) fn method(config: &RequestConfig) -> reqwest::Method {
    if config.demo_mode {
        reqwest::Method::GET
    } else {
        reqwest::Method::POST
    }
}
