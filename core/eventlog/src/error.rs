//! Error types for event log operations.
//!
//! Rejections are routine: callers treat every `StartLoggingError` as
//! "no logging this time" and carry on.

use std::path::PathBuf;

use crate::types::{ProfileId, SessionKey};

/// Why a remote-bound log could not be started.
#[derive(Debug, thiserror::Error)]
pub enum StartLoggingError {
    // ─────────────────────────────────────────────────────────────────────
    // Argument Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Remote-bound logs require a bounded maximum file size")]
    UnlimitedFileSize,

    #[error("Metadata must be less than 2^24 bytes (got {len})")]
    MetadataTooLarge { len: usize },

    #[error(
        "Max file size {max_size_bytes} leaves no room for events after {header_and_metadata} header and metadata bytes"
    )]
    NoRoomForEvents {
        max_size_bytes: u64,
        header_and_metadata: u64,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session {0} is not active")]
    SessionNotActive(SessionKey),

    #[error("Remote logging already underway for {0}")]
    AlreadyLogging(SessionKey),

    #[error("Remote logging for {0} already finished; it cannot be restarted")]
    LogAlreadyFinished(SessionKey),

    // ─────────────────────────────────────────────────────────────────────
    // Quota Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Too many active remote-bound logs ({limit} max)")]
    ActiveLogLimit { limit: usize },

    #[error("Profile {profile} has reached its pending log quota ({limit} max)")]
    ProfileQuotaExceeded { profile: ProfileId, limit: usize },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StartLoggingError {
    /// True for the two quota rejections, which may clear up once logs upload or expire.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            StartLoggingError::ActiveLogLimit { .. }
                | StartLoggingError::ProfileQuotaExceeded { .. }
        )
    }
}

/// Errors reading a stored log back off disk.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Log file truncated: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("Unsupported log file version {0}")]
    UnsupportedVersion(u8),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the log directory helpers.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Path for remote-bound logs is taken by a non-directory: {0}")]
    NotADirectory(PathBuf),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<StorageError> for String {
    fn from(err: StorageError) -> String {
        err.to_string()
    }
}

impl From<FormatError> for String {
    fn from(err: FormatError) -> String {
        err.to_string()
    }
}
