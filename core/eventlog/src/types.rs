//! Identifiers and records shared across the event log modules.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Maximum number of logs being written at once, across all profiles.
pub const MAX_ACTIVE_LOGS: usize = 3;

/// Maximum number of active plus pending logs per profile.
/// Active logs count too, since they become pending once completed.
pub const MAX_PENDING_LOGS_PER_PROFILE: usize = 5;

/// Pending logs older than this are deleted without being uploaded.
pub const RETENTION_DAYS: i64 = 3;

/// Passing this as `max_size_bytes` requests an unbounded file, which
/// remote-bound logs never allow.
pub const UNLIMITED_FILE_SIZE: u64 = 0;

const _: () = assert!(MAX_ACTIVE_LOGS <= MAX_PENDING_LOGS_PER_PROFILE);

pub fn retention_window() -> Duration {
    Duration::days(RETENTION_DAYS)
}

/// One real-time session inside one owning process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionKey {
    pub process_id: u32,
    pub local_id: i32,
}

impl SessionKey {
    pub fn new(process_id: u32, local_id: i32) -> Self {
        Self {
            process_id,
            local_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.process_id, self.local_id)
    }
}

/// Opaque identifier of the profile owning a log directory and quota bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProfileId(pub u64);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "profile-{}", self.0)
    }
}

/// A finished log waiting for upload or expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingLog {
    pub profile: ProfileId,
    pub path: PathBuf,
    pub last_modified: DateTime<Utc>,
}

impl PendingLog {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.last_modified, now)
    }
}

/// True once `last_modified` falls strictly before the retention cutoff.
pub fn is_expired(last_modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    last_modified < now - retention_window()
}
