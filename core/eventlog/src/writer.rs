//! Binary log writer: creates a log file, writes header and metadata, appends
//! event payloads, and closes the file into a [`PendingLog`].

use chrono::{DateTime, Utc};
use fs_err as fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::error::StartLoggingError;
use crate::format::{LogHeader, HEADER_SIZE};
use crate::storage::random_log_file_name;
use crate::types::{PendingLog, ProfileId, UNLIMITED_FILE_SIZE};

/// Checks size and metadata arguments before any session or quota lookup.
pub fn validate_log_parameters(
    max_size_bytes: u64,
    metadata: &[u8],
) -> Result<LogHeader, StartLoggingError> {
    if max_size_bytes == UNLIMITED_FILE_SIZE {
        return Err(StartLoggingError::UnlimitedFileSize);
    }

    let header = LogHeader::for_metadata(metadata.len()).ok_or(
        StartLoggingError::MetadataTooLarge {
            len: metadata.len(),
        },
    )?;

    let header_and_metadata = (HEADER_SIZE + metadata.len()) as u64;
    if header_and_metadata >= max_size_bytes {
        return Err(StartLoggingError::NoRoomForEvents {
            max_size_bytes,
            header_and_metadata,
        });
    }

    Ok(header)
}

/// Result of appending to an active log.
#[derive(Debug)]
pub enum AppendOutcome {
    /// Written; room remains.
    Written,
    /// Written; the file reached its maximum size.
    Full,
    /// Not written; it would exceed the maximum size.
    Refused,
    /// The write failed part-way.
    Failed(io::Error),
}

/// A log file open for appending, bound to one live session.
#[derive(Debug)]
pub struct ActiveLog {
    profile: ProfileId,
    path: PathBuf,
    file: fs::File,
    max_size_bytes: u64,
    bytes_written: u64,
}

impl ActiveLog {
    /// Creates a new randomly named file in `logs_dir` and writes its header and metadata.
    ///
    /// On failure after the file exists, the partial file is deleted.
    pub fn create(
        profile: ProfileId,
        logs_dir: &Path,
        max_size_bytes: u64,
        metadata: &[u8],
    ) -> Result<Self, StartLoggingError> {
        let header = validate_log_parameters(max_size_bytes, metadata)?;
        let path = logs_dir.join(random_log_file_name());

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| StartLoggingError::Io {
                context: "Failed to create log file".to_string(),
                source,
            })?;

        Self::write_prefix(profile, path, file, max_size_bytes, header, metadata)
    }

    /// Writes header and metadata into a freshly opened `file` at `path`.
    fn write_prefix(
        profile: ProfileId,
        path: PathBuf,
        mut file: fs::File,
        max_size_bytes: u64,
        header: LogHeader,
        metadata: &[u8],
    ) -> Result<Self, StartLoggingError> {
        if let Err(source) = file.write_all(&header.encode()) {
            discard_log_file(file, &path);
            return Err(StartLoggingError::Io {
                context: "Failed to write log header".to_string(),
                source,
            });
        }

        if let Err(source) = file.write_all(metadata) {
            discard_log_file(file, &path);
            return Err(StartLoggingError::Io {
                context: "Failed to write log metadata".to_string(),
                source,
            });
        }

        Ok(Self {
            profile,
            path,
            file,
            max_size_bytes,
            bytes_written: header.prefix_len() as u64,
        })
    }

    /// An active log at `path` whose writes all fail with `ENOSPC`.
    #[cfg(all(test, target_os = "linux"))]
    pub(crate) fn failing_writes(
        profile: ProfileId,
        path: PathBuf,
        max_size_bytes: u64,
    ) -> io::Result<Self> {
        let file = fs::OpenOptions::new().write(true).open("/dev/full")?;
        Ok(Self {
            profile,
            path,
            file,
            max_size_bytes,
            bytes_written: HEADER_SIZE as u64,
        })
    }

    pub fn profile(&self) -> ProfileId {
        self.profile
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn append(&mut self, bytes: &[u8]) -> AppendOutcome {
        let len = bytes.len() as u64;
        let Some(total) = self.bytes_written.checked_add(len) else {
            return AppendOutcome::Refused;
        };
        if total > self.max_size_bytes {
            return AppendOutcome::Refused;
        }

        if let Err(err) = self.file.write_all(bytes) {
            return AppendOutcome::Failed(err);
        }
        self.bytes_written = total;

        if total == self.max_size_bytes {
            AppendOutcome::Full
        } else {
            AppendOutcome::Written
        }
    }

    /// Flushes and closes the file. The finalization instant stands in for
    /// the file's modification time.
    pub fn finalize(self, now: DateTime<Utc>) -> PendingLog {
        let profile = self.profile;
        let path = self.close();
        PendingLog {
            profile,
            path,
            last_modified: now,
        }
    }

    /// Flushes and closes the file without producing a pending entry.
    pub fn close(mut self) -> PathBuf {
        if let Err(err) = self.file.flush() {
            warn!(error = %err, path = %self.path.display(), "Failed to flush log file");
        }
        self.path
    }
}

fn discard_log_file(file: fs::File, path: &Path) {
    drop(file);
    if let Err(err) = fs::remove_file(path) {
        error!(error = %err, path = %path.display(), "Failed to delete partial log file");
    }
}
