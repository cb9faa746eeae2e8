//! Upload module
//!
//! Building blocks of the upload engine: chunk planning, file sources,
//! per-file state, admission, retry bookkeeping, validation and response
//! parsing. The engine that drives them lives in [`crate::uploader`].

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod chunk;
pub mod params;
pub mod queue;
pub mod response;
pub mod retry;
pub mod source;
pub mod state;
pub mod validation;

pub use chunk::{ChunkData, ChunkInfo};
pub use response::UploadResponse;
pub use source::{FileSource, SourceError};
pub use state::FileStatus;
pub use validation::FileDescriptor;

/// Handle of a submitted file.
///
/// Ids are allocated from a counter that only ever grows, so an id is never
/// handed out twice by the same uploader, not even after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u64);

impl FileId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FileId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
