//! File payloads handed to the uploader
//!
//! A [`FileSource`] is either an in-memory buffer or a file on disk. Name
//! and size are fixed when the source is created; request bodies are
//! streamed from the source in frames so large files never have to sit in
//! memory.

use bytes::Bytes;
use futures::stream::{self, Stream};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Request body bytes, in frames
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// Source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Range {start}..{end} is outside of a {size} byte file")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },
}

#[derive(Debug, Clone)]
enum SourceData {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file to upload
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    size: u64,
    content_type: Option<String>,
    data: SourceData,
}

impl FileSource {
    /// Wrap an in-memory buffer
    pub fn from_bytes(name: impl AsRef<str>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let name = normalize_name(name.as_ref());
        Self {
            content_type: guess_content_type(&name).map(str::to_string),
            name,
            size: data.len() as u64,
            data: SourceData::Memory(data),
        }
    }

    /// Reference a file on disk. The size is captured now.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(SourceError::NotAFile(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| normalize_name(&path.to_string_lossy()));

        Ok(Self {
            content_type: guess_content_type(&name).map(str::to_string),
            name,
            size: metadata.len(),
            data: SourceData::Path(path.to_path_buf()),
        })
    }

    /// Override the detected MIME type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Stream the bytes in `range` in frames of at most `frame_size` bytes
    pub async fn stream_range(
        &self,
        range: Range<u64>,
        frame_size: usize,
    ) -> Result<ByteStream, SourceError> {
        if range.start > range.end || range.end > self.size {
            return Err(SourceError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                size: self.size,
            });
        }
        let frame_size = frame_size.max(1);

        match &self.data {
            // The buffer already fits in memory, so its length fits in usize
            SourceData::Memory(bytes) => {
                let data = bytes.slice(range.start as usize..range.end as usize);
                let frames: Vec<Bytes> = (0..data.len())
                    .step_by(frame_size)
                    .map(|start| data.slice(start..(start + frame_size).min(data.len())))
                    .collect();
                Ok(Box::pin(stream::iter(frames.into_iter().map(Ok::<_, std::io::Error>))))
            }
            SourceData::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                let reader = file.take(range.end - range.start);
                Ok(Box::pin(ReaderStream::with_capacity(reader, frame_size)))
            }
        }
    }
}

/// Strip any directory part, accepting both separators.
fn normalize_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

fn guess_content_type(name: &str) -> Option<&'static str> {
    mime_guess::from_path(name).first_raw()
}
