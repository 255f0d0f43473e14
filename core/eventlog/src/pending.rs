//! Pending-log queue and retention pruning.
//!
//! The queue keeps insertion order; uploads take from the front. Pruning runs
//! opportunistically (before admission, before upload selection, and on
//! session start/end) rather than on a timer.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, error};

use crate::quota::QuotaCounters;
use crate::types::{PendingLog, ProfileId};

#[derive(Debug, Clone, Default)]
pub struct PendingLogs {
    queue: VecDeque<PendingLog>,
}

/// Results from a pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    /// Expired entries dropped from the queue.
    pub logs_removed: u32,
    /// Errors deleting backing files. The entries were dropped regardless.
    pub errors: Vec<String>,
}

impl PendingLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, log: PendingLog) {
        self.queue.push_back(log);
    }

    /// Returns an entry to the head of the queue.
    pub fn push_front(&mut self, log: PendingLog) {
        self.queue.push_front(log);
    }

    /// Takes the oldest-inserted entry.
    pub fn pop_front(&mut self) -> Option<PendingLog> {
        self.queue.pop_front()
    }

    pub fn front(&self) -> Option<&PendingLog> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingLog> {
        self.queue.iter()
    }

    pub fn count_for(&self, profile: ProfileId) -> usize {
        self.queue.iter().filter(|log| log.profile == profile).count()
    }

    /// Removes every entry of `profile` from the queue without touching the files.
    pub fn remove_profile(&mut self, profile: ProfileId) -> Vec<PendingLog> {
        let (removed, kept): (VecDeque<_>, VecDeque<_>) =
            self.queue.drain(..).partition(|log| log.profile == profile);
        self.queue = kept;
        removed.into_iter().collect()
    }

    /// Deletes and forgets every entry older than the retention window,
    /// decrementing its profile's pending counter.
    pub fn prune(&mut self, now: DateTime<Utc>, quota: &mut QuotaCounters) -> PruneStats {
        let mut stats = PruneStats::default();

        self.queue.retain(|log| {
            if !log.is_expired(now) {
                return true;
            }

            debug!(
                profile = %log.profile,
                path = %log.path.display(),
                last_modified = %log.last_modified.to_rfc3339(),
                "Pruning expired log"
            );
            if let Err(err) = fs::remove_file(&log.path) {
                error!(error = %err, path = %log.path.display(), "Failed to delete expired log");
                stats.errors.push(err.to_string());
            }
            quota.on_log_uploaded_or_expired(log.profile);
            stats.logs_removed += 1;
            false
        });

        stats
    }
}
