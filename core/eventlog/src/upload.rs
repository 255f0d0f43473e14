//! Upload coordination.
//!
//! At most one upload is in flight. The uploader is an opaque sink: it gets a
//! file path plus an [`UploadCompletion`], and reports back through the
//! completion's channel. The manager drains that channel on its own sequence,
//! so completion never mutates manager state from another thread.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::types::PendingLog;

/// Outcome of one upload, delivered back to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub upload_id: u64,
    pub path: PathBuf,
    pub success: bool,
}

/// One-shot completion handle given to an uploader.
#[derive(Debug)]
pub struct UploadCompletion {
    upload_id: u64,
    path: PathBuf,
    sender: Sender<UploadResult>,
}

impl UploadCompletion {
    pub fn upload_id(&self) -> u64 {
        self.upload_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reports the outcome. Consumes the handle, so each upload reports once.
    pub fn complete(self, success: bool) {
        let result = UploadResult {
            upload_id: self.upload_id,
            path: self.path,
            success,
        };
        if self.sender.send(result).is_err() {
            debug!(upload_id = self.upload_id, "Upload finished after manager shut down");
        }
    }
}

/// An upload in progress. Dropping it discards the upload object; there is
/// no cancellation beyond that.
pub trait LogUploader: Send {
    fn log_path(&self) -> &Path;
}

pub trait UploaderFactory: Send {
    fn create(&mut self, path: &Path, completion: UploadCompletion) -> Box<dyn LogUploader>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Provided factories
// ─────────────────────────────────────────────────────────────────────────────

/// Uploader that never completes, keeping logs parked in the upload slot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUploaderFactory;

struct NullUploader {
    path: PathBuf,
    _completion: UploadCompletion,
}

impl LogUploader for NullUploader {
    fn log_path(&self) -> &Path {
        &self.path
    }
}

impl UploaderFactory for NullUploaderFactory {
    fn create(&mut self, path: &Path, completion: UploadCompletion) -> Box<dyn LogUploader> {
        Box::new(NullUploader {
            path: path.to_path_buf(),
            _completion: completion,
        })
    }
}

type UploadFn = dyn Fn(&Path) -> bool + Send + Sync;

/// Runs a caller-supplied transport on a background thread per upload and
/// posts its boolean result back to the manager.
#[derive(Clone)]
pub struct ThreadUploaderFactory {
    upload: Arc<UploadFn>,
}

impl ThreadUploaderFactory {
    pub fn new<F>(upload: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        Self {
            upload: Arc::new(upload),
        }
    }
}

struct ThreadUploader {
    path: PathBuf,
}

impl LogUploader for ThreadUploader {
    fn log_path(&self) -> &Path {
        &self.path
    }
}

impl UploaderFactory for ThreadUploaderFactory {
    fn create(&mut self, path: &Path, completion: UploadCompletion) -> Box<dyn LogUploader> {
        let upload = Arc::clone(&self.upload);
        let upload_path = path.to_path_buf();
        thread::spawn(move || {
            let success = upload(&upload_path);
            completion.complete(success);
        });
        Box::new(ThreadUploader {
            path: path.to_path_buf(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

struct InFlightUpload {
    upload_id: u64,
    log: PendingLog,
    uploader: Box<dyn LogUploader>,
}

/// Owns the upload slot, the uploader factory, and the completion channel.
///
/// Gating (sessions alive, pending set empty) is the manager's job; the
/// coordinator only enforces the single slot.
pub struct UploadCoordinator {
    factory: Box<dyn UploaderFactory>,
    in_flight: Option<InFlightUpload>,
    sender: Sender<UploadResult>,
    receiver: Receiver<UploadResult>,
    next_upload_id: u64,
}

impl UploadCoordinator {
    pub fn new(factory: Box<dyn UploaderFactory>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            factory,
            in_flight: None,
            sender,
            receiver,
            next_upload_id: 1,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&PendingLog> {
        self.in_flight.as_ref().map(|upload| &upload.log)
    }

    /// Path the current uploader is working on.
    pub fn uploading_path(&self) -> Option<&Path> {
        self.in_flight.as_ref().map(|upload| upload.uploader.log_path())
    }

    /// Hands `log` to a new uploader. Returns the log back if the slot is taken.
    pub fn start(&mut self, log: PendingLog) -> Result<u64, PendingLog> {
        if self.in_flight.is_some() {
            return Err(log);
        }

        let upload_id = self.next_upload_id;
        self.next_upload_id += 1;

        let completion = UploadCompletion {
            upload_id,
            path: log.path.clone(),
            sender: self.sender.clone(),
        };
        let uploader = self.factory.create(&log.path, completion);
        self.in_flight = Some(InFlightUpload {
            upload_id,
            log,
            uploader,
        });
        Ok(upload_id)
    }

    /// Clears the slot if `result` belongs to the in-flight upload.
    /// Stale results (from a discarded upload) return `None`.
    pub fn finish(&mut self, result: &UploadResult) -> Option<PendingLog> {
        match &self.in_flight {
            Some(upload) if upload.upload_id == result.upload_id => {
                self.in_flight.take().map(|upload| upload.log)
            }
            _ => None,
        }
    }

    /// Swaps the factory, discarding any in-flight upload object.
    pub fn replace_factory(&mut self, factory: Box<dyn UploaderFactory>) -> Option<PendingLog> {
        self.factory = factory;
        self.in_flight.take().map(|upload| upload.log)
    }

    pub fn try_recv(&self) -> Option<UploadResult> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<UploadResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
