//! Chunk planning
//!
//! Pure functions mapping a file size and chunk size to ordered byte ranges.
//! Chunks are never stored; any chunk can be re-derived from its index.

use std::ops::Range;

/// Number of chunks needed to cover `file_size` bytes.
///
/// Zero-byte files have zero chunks; callers reject empty files before planning.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    debug_assert!(chunk_size > 0, "chunk size must be positive");
    file_size.div_ceil(chunk_size)
}

/// Byte range `[start, end)` of chunk `index`. The last chunk may be short.
pub fn chunk_range(index: u64, file_size: u64, chunk_size: u64) -> Range<u64> {
    let start = index.saturating_mul(chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    start..end
}

/// One planned chunk of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkData {
    pub part: u64,
    pub start: u64,
    pub end: u64,
    pub count: u64,
}

impl ChunkData {
    /// Plan chunk `part` of a file
    pub fn new(part: u64, file_size: u64, chunk_size: u64) -> Self {
        let range = chunk_range(part, file_size, chunk_size);
        Self {
            part,
            start: range.start,
            end: range.end,
            count: total_chunks(file_size, chunk_size),
        }
    }

    /// Length of the chunk in bytes
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Callback view with 1-based inclusive byte numbering
    pub fn info(&self) -> ChunkInfo {
        ChunkInfo {
            part_index: self.part,
            start_byte: self.start + 1,
            end_byte: self.end,
            total_parts: self.count,
        }
    }
}

/// Chunk description handed to `on_upload_chunk` and `on_resume`.
///
/// `start_byte` and `end_byte` are 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub part_index: u64,
    pub start_byte: u64,
    pub end_byte: u64,
    pub total_parts: u64,
}
