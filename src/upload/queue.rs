//! Admission queue
//!
//! FIFO list of files that hold or wait for one of `max_connections` upload
//! slots. The first `max_connections` entries are admitted; the rest wait.
//! A file keeps its entry, and therefore its slot, across all of its chunks
//! and while it waits for an automatic retry.

use super::FileId;

#[derive(Debug)]
pub struct AdmissionQueue {
    ids: Vec<FileId>,
    max: usize,
}

impl AdmissionQueue {
    pub fn new(max_connections: usize) -> Self {
        Self {
            ids: Vec::new(),
            max: max_connections.max(1),
        }
    }

    /// Append `id`. Returns `true` when it was admitted and should start now.
    pub fn push(&mut self, id: FileId) -> bool {
        self.ids.push(id);
        self.ids.len() <= self.max
    }

    /// Remove `id`. Returns the waiting file promoted into the freed slot, if any.
    ///
    /// Removing an id that is not queued changes nothing.
    pub fn remove(&mut self, id: FileId) -> Option<FileId> {
        let index = self.ids.iter().position(|&queued| queued == id)?;
        self.ids.remove(index);

        if self.ids.len() >= self.max && index < self.max {
            Some(self.ids[self.max - 1])
        } else {
            None
        }
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Empty the queue without promoting anything, returning its entries in order
    pub fn drain(&mut self) -> Vec<FileId> {
        std::mem::take(&mut self.ids)
    }
}
