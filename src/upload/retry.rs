//! Retry bookkeeping
//!
//! Tracks, per file, how many automatic retries have run, whether the
//! server forbade further retries, and the pending retry timer.

use super::FileId;
use crate::config::RetryConfig;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Debug)]
pub struct RetryController {
    enabled: bool,
    max_attempts: u32,
    delay: Duration,
    attempts: HashMap<FileId, u32>,
    prevented: HashSet<FileId>,
    /// Pending timer per file, tagged with a token so a timer that already
    /// fired can be told apart from its replacement
    timers: HashMap<FileId, (u64, AbortHandle)>,
}

impl RetryController {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enable_auto,
            max_attempts: config.max_auto_attempts,
            delay: Duration::from_secs(config.auto_attempt_delay_seconds),
            attempts: HashMap::new(),
            prevented: HashSet::new(),
            timers: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record the server's retry verdict from the latest failed response
    pub fn set_prevented(&mut self, id: FileId, prevented: bool) {
        if prevented {
            self.prevented.insert(id);
        } else {
            self.prevented.remove(&id);
        }
    }

    pub fn is_prevented(&self, id: FileId) -> bool {
        self.prevented.contains(&id)
    }

    /// Automatic retries already run for `id`
    pub fn attempts(&self, id: FileId) -> u32 {
        self.attempts.get(&id).copied().unwrap_or(0)
    }

    pub fn should_auto_retry(&self, id: FileId) -> bool {
        self.enabled && !self.is_prevented(id) && self.attempts(id) < self.max_attempts
    }

    /// Count a retry whose timer just fired
    pub fn record_attempt(&mut self, id: FileId) {
        *self.attempts.entry(id).or_insert(0) += 1;
    }

    pub fn set_timer(&mut self, id: FileId, token: u64, handle: AbortHandle) {
        if let Some((_, previous)) = self.timers.insert(id, (token, handle)) {
            previous.abort();
        }
    }

    /// Claim the timer that fired with `token`. `false` means it was
    /// cancelled or replaced in the meantime.
    pub fn take_due(&mut self, id: FileId, token: u64) -> bool {
        match self.timers.get(&id) {
            Some((current, _)) if *current == token => {
                self.timers.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Abort the pending timer of `id`. Returns whether there was one.
    pub fn cancel_timer(&mut self, id: FileId) -> bool {
        match self.timers.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn has_timer(&self, id: FileId) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Drop every counter and flag, aborting all timers
    pub fn reset(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
        self.attempts.clear();
        self.prevented.clear();
    }
}
