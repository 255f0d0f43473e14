//! # rtc-eventlog-core
//!
//! Lifecycle management for remote-bound RTC event logs: deciding whether a
//! live session may start a diagnostic log, writing that log to disk, keeping
//! per-profile and global quotas, pruning expired logs, and handing finished
//! logs to an uploader one at a time.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The only asynchronous edge is
//!   the uploader, whose completion is posted back over a channel.
//! - **Not thread-safe**: A single logical sequence owns the manager. Callers that
//!   need sharing wrap it themselves (`Mutex`, a dedicated thread, ...).
//! - **Routine rejection**: Refusing to log is a normal outcome, reported through
//!   `Result`/`bool`, never a panic.
//! - **No ambient state**: Everything lives inside one [`RemoteLogManager`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rtc_eventlog::{NoopObserver, NullUploaderFactory, ProfileId, RemoteLogManager, SessionKey};
//!
//! let mut manager = RemoteLogManager::new(Box::new(NoopObserver), Box::new(NullUploaderFactory));
//! let key = SessionKey::new(7, 1);
//! manager.session_started(key);
//! let handle = manager.start_logging(key, ProfileId(1), &logs_dir, 1 << 20, b"meta")?;
//! manager.write_to_log(key, b"event");
//! manager.session_ended(key);
//! ```

pub mod error;
pub mod format;
pub mod manager;
pub mod observer;
pub mod pending;
pub mod quota;
pub mod sessions;
pub mod storage;
pub mod types;
pub mod upload;
pub mod writer;

pub use error::{FormatError, StartLoggingError, StorageError};
pub use format::{
    read_log_file, LogHeader, StoredLog, HEADER_SIZE, LOG_FILE_VERSION, MAX_METADATA_LEN,
};
pub use manager::{Clock, LogHandle, RemoteLogManager};
pub use observer::{NoopObserver, RemoteLogObserver};
pub use pending::{PendingLogs, PruneStats};
pub use quota::{QuotaCounters, QuotaSnapshot};
pub use sessions::SessionRegistry;
pub use storage::{list_log_files, DiscoveredLog, LogStorage};
pub use types::*;
pub use upload::{
    LogUploader, NullUploaderFactory, ThreadUploaderFactory, UploadCompletion, UploadResult,
    UploaderFactory,
};
