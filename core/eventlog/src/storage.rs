//! Path policy for remote-bound logs.
//!
//! The manager never enumerates directories on its own. Callers use these
//! helpers at profile-enable time to locate a profile's logs directory and to
//! list the logs left over from earlier runs.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::StorageError;

pub const LOGS_SUBDIRECTORY: &str = "webrtc_event_logs";
pub const LOG_FILE_EXTENSION: &str = "log";
pub const LOG_FILE_PREFIX: &str = "event_log_";

/// Paths for one profile's remote-bound logs.
///
/// Production code roots this at the profile directory; tests root it at a
/// temp directory.
#[derive(Debug, Clone)]
pub struct LogStorage {
    root: PathBuf,
}

impl LogStorage {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the `webrtc_event_logs/` directory under the root.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_SUBDIRECTORY)
    }

    /// Creates the logs directory if missing. Fails if a non-directory occupies the path.
    pub fn ensure_logs_dir(&self) -> Result<PathBuf, StorageError> {
        let dir = self.logs_dir();
        if dir.exists() {
            if !dir.is_dir() {
                return Err(StorageError::NotADirectory(dir));
            }
        } else {
            fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
                context: "Failed to create logs directory".to_string(),
                source,
            })?;
        }
        Ok(dir)
    }

    pub fn list_log_files(&self) -> Result<Vec<DiscoveredLog>, StorageError> {
        list_log_files(&self.logs_dir())
    }
}

/// A log file found on disk, with the timestamp used for retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredLog {
    pub path: PathBuf,
    pub last_modified: DateTime<Utc>,
}

/// Random file name for a new log. Collisions surface as creation failures.
pub fn random_log_file_name() -> String {
    format!(
        "{}{}.{}",
        LOG_FILE_PREFIX,
        rand::random::<u64>(),
        LOG_FILE_EXTENSION
    )
}

pub fn is_log_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == LOG_FILE_EXTENSION)
        .unwrap_or(false)
}

/// Lists `*.log` files directly inside `dir`, oldest first.
///
/// Entries whose metadata cannot be read are skipped with a warning.
pub fn list_log_files(dir: &Path) -> Result<Vec<DiscoveredLog>, StorageError> {
    let entries = fs::read_dir(dir).map_err(|source| StorageError::Io {
        context: "Failed to read logs directory".to_string(),
        source,
    })?;

    let mut logs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, dir = %dir.display(), "Failed to read logs directory entry");
                continue;
            }
        };
        let path = entry.path();
        if !is_log_file(&path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Failed to stat log file");
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "Log file has no modification time");
                continue;
            }
        };
        logs.push(DiscoveredLog {
            path,
            last_modified: DateTime::<Utc>::from(modified),
        });
    }

    logs.sort_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(logs)
}
