//! The remote-bound log manager.
//!
//! One instance owns the session registry, active logs, pending queue, quota
//! counters and upload slot. Every public method runs on the caller's
//! sequence; the only asynchronous edge is upload completion, which arrives
//! over a channel drained by [`RemoteLogManager::process_upload_completions`]
//! or [`RemoteLogManager::wait_for_upload`].
//!
//! ## Per-session lifecycle
//!
//! ```text
//! NoLog --start_logging--> ActivelyLogging --stop / session end / process exit--> Finished
//! ```
//!
//! A finished log lives on only as a pending entry keyed by path. Logging
//! cannot restart for the same live session.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::StartLoggingError;
use crate::observer::RemoteLogObserver;
use crate::pending::{PendingLogs, PruneStats};
use crate::quota::{QuotaCounters, QuotaSnapshot};
use crate::sessions::SessionRegistry;
use crate::storage::DiscoveredLog;
use crate::types::{PendingLog, ProfileId, SessionKey};
use crate::upload::{UploadCoordinator, UploadResult, UploaderFactory};
use crate::writer::{validate_log_parameters, ActiveLog, AppendOutcome};

/// Returned when a log starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogHandle {
    pub key: SessionKey,
    pub profile: ProfileId,
    pub path: PathBuf,
}

/// Source of "now" for finalization timestamps and retention.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

pub struct RemoteLogManager {
    sessions: SessionRegistry,
    active_logs: BTreeMap<SessionKey, ActiveLog>,
    /// Live sessions whose log already finished.
    finished_sessions: HashSet<SessionKey>,
    pending: PendingLogs,
    quota: QuotaCounters,
    enabled_profiles: HashSet<ProfileId>,
    uploads: UploadCoordinator,
    observer: Box<dyn RemoteLogObserver>,
    clock: Clock,
}

impl RemoteLogManager {
    pub fn new(
        observer: Box<dyn RemoteLogObserver>,
        uploader_factory: Box<dyn UploaderFactory>,
    ) -> Self {
        Self::with_clock(observer, uploader_factory, Box::new(Utc::now))
    }

    pub fn with_clock(
        observer: Box<dyn RemoteLogObserver>,
        uploader_factory: Box<dyn UploaderFactory>,
        clock: Clock,
    ) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            active_logs: BTreeMap::new(),
            finished_sessions: HashSet::new(),
            pending: PendingLogs::new(),
            quota: QuotaCounters::new(),
            enabled_profiles: HashSet::new(),
            uploads: UploadCoordinator::new(uploader_factory),
            observer,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profiles
    // ─────────────────────────────────────────────────────────────────────────

    /// Enables a profile and seeds its pending logs from a directory listing.
    ///
    /// Discovered logs are counted without consulting the global active cap.
    /// Returns false if the profile was already enabled.
    pub fn enable_profile(&mut self, profile: ProfileId, mut existing: Vec<DiscoveredLog>) -> bool {
        if !self.enabled_profiles.insert(profile) {
            warn!(profile = %profile, "Profile already enabled for remote-bound logging");
            return false;
        }

        existing.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut discovered = 0usize;
        for log in existing {
            if self.is_tracked_path(&log.path) {
                debug!(path = %log.path.display(), "Skipping already tracked log");
                continue;
            }
            self.pending.push(PendingLog {
                profile,
                path: log.path,
                last_modified: log.last_modified,
            });
            self.quota.on_pending_discovered(profile);
            discovered += 1;
        }

        info!(
            profile = %profile,
            discovered,
            "Remote-bound logging enabled for profile"
        );
        self.maybe_start_upload();
        true
    }

    /// Disables a profile: stops its active logs, drops its pending entries
    /// (files stay on disk for the next enable), and forgets its counters.
    ///
    /// Returns false if the profile was not enabled. Cleanup runs either way.
    pub fn disable_profile(&mut self, profile: ProfileId) -> bool {
        let was_enabled = self.enabled_profiles.remove(&profile);

        let keys: Vec<SessionKey> = self
            .active_logs
            .iter()
            .filter(|(_, log)| log.profile() == profile)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            if let Some(log) = self.active_logs.remove(&key) {
                self.quota.on_log_abandoned(profile);
                let path = log.close();
                debug!(session = %key, path = %path.display(), "Closed log of disabled profile");
                if self.sessions.contains(key) {
                    self.finished_sessions.insert(key);
                }
                self.observer.on_log_stopped(key);
            }
        }

        let dropped = self.pending.remove_profile(profile);
        for _ in &dropped {
            self.quota.on_log_uploaded_or_expired(profile);
        }
        self.quota.forget(profile);

        info!(
            profile = %profile,
            pending_dropped = dropped.len(),
            "Remote-bound logging disabled for profile"
        );
        was_enabled
    }

    pub fn is_profile_enabled(&self, profile: ProfileId) -> bool {
        self.enabled_profiles.contains(&profile)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session liveness
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers a live session. Returns false for a duplicate key.
    pub fn session_started(&mut self, key: SessionKey) -> bool {
        self.prune_expired_logs();

        if !self.sessions.add(key) {
            warn!(session = %key, "Session already registered");
            return false;
        }
        debug!(session = %key, "Session started");
        true
    }

    /// Forgets a session, finishing its log first. Returns false for an unknown key.
    pub fn session_ended(&mut self, key: SessionKey) -> bool {
        self.prune_expired_logs();

        if !self.sessions.contains(key) {
            warn!(session = %key, "Unknown session ended");
            return false;
        }

        self.finalize_log(key);
        self.sessions.remove(key);
        self.finished_sessions.remove(&key);
        debug!(session = %key, "Session ended");

        self.maybe_start_upload();
        true
    }

    /// Forgets every session of a process, then finishes their logs.
    ///
    /// Sessions go first so that no finish side effect refers to a key that
    /// could be reused.
    pub fn process_terminated(&mut self, process_id: u32) {
        self.prune_expired_logs();

        let removed = self.sessions.remove_process(process_id);
        self.finished_sessions.retain(|key| key.process_id != process_id);

        let keys: Vec<SessionKey> = self
            .active_logs
            .keys()
            .filter(|key| key.process_id == process_id)
            .copied()
            .collect();
        for key in &keys {
            self.finalize_log(*key);
        }

        debug!(
            process_id,
            sessions_removed = removed.len(),
            logs_finished = keys.len(),
            "Process terminated"
        );

        // Even with no logs closed, the removed sessions may have been the
        // last ones holding back uploads.
        self.maybe_start_upload();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts a remote-bound log for a live session.
    pub fn start_logging(
        &mut self,
        key: SessionKey,
        profile: ProfileId,
        logs_dir: &Path,
        max_size_bytes: u64,
        metadata: &[u8],
    ) -> Result<LogHandle, StartLoggingError> {
        let result = self.try_start_logging(key, profile, logs_dir, max_size_bytes, metadata);
        if let Err(err) = &result {
            if err.is_quota() {
                info!(
                    session = %key,
                    profile = %profile,
                    error = %err,
                    "Remote logging denied"
                );
            } else {
                warn!(
                    session = %key,
                    profile = %profile,
                    error = %err,
                    "Remote logging not started"
                );
            }
        }
        result
    }

    fn try_start_logging(
        &mut self,
        key: SessionKey,
        profile: ProfileId,
        logs_dir: &Path,
        max_size_bytes: u64,
        metadata: &[u8],
    ) -> Result<LogHandle, StartLoggingError> {
        validate_log_parameters(max_size_bytes, metadata)?;

        if !self.sessions.contains(key) {
            return Err(StartLoggingError::SessionNotActive(key));
        }
        if self.active_logs.contains_key(&key) {
            return Err(StartLoggingError::AlreadyLogging(key));
        }
        if self.finished_sessions.contains(&key) {
            return Err(StartLoggingError::LogAlreadyFinished(key));
        }

        // Pruning may make room for this log.
        self.prune_expired_logs();
        self.quota.check_admission(profile)?;

        let log = ActiveLog::create(profile, logs_dir, max_size_bytes, metadata)?;
        let path = log.path().to_path_buf();
        self.active_logs.insert(key, log);
        self.quota.on_log_started(profile);

        info!(
            session = %key,
            profile = %profile,
            path = %path.display(),
            max_size_bytes,
            "Remote logging started"
        );
        self.observer.on_log_started(key, &path);

        Ok(LogHandle { key, profile, path })
    }

    /// Appends an opaque payload to the session's log.
    ///
    /// Returns false if no log is active, if the payload would exceed the
    /// log's maximum size, or if the write fails (which also finishes the log).
    pub fn write_to_log(&mut self, key: SessionKey, bytes: &[u8]) -> bool {
        let Some(log) = self.active_logs.get_mut(&key) else {
            return false;
        };

        match log.append(bytes) {
            AppendOutcome::Written => true,
            AppendOutcome::Full => {
                debug!(session = %key, "Log reached its maximum size");
                self.finalize_log(key);
                true
            }
            AppendOutcome::Refused => {
                warn!(
                    session = %key,
                    len = bytes.len(),
                    written = log.bytes_written(),
                    max_size_bytes = log.max_size_bytes(),
                    "Write would exceed maximum log size"
                );
                false
            }
            AppendOutcome::Failed(err) => {
                warn!(session = %key, error = %err, "Failed to write to log file");
                self.finalize_log(key);
                false
            }
        }
    }

    /// Finishes the session's log without ending the session.
    pub fn stop_logging(&mut self, key: SessionKey) -> bool {
        self.finalize_log(key)
    }

    fn finalize_log(&mut self, key: SessionKey) -> bool {
        let Some(log) = self.active_logs.remove(&key) else {
            return false;
        };

        let pending = log.finalize(self.now());
        self.quota.on_log_finalized_to_pending(pending.profile);
        info!(
            session = %key,
            profile = %pending.profile,
            path = %pending.path.display(),
            "Remote logging stopped"
        );
        self.pending.push(pending);

        if self.sessions.contains(key) {
            self.finished_sessions.insert(key);
        }
        self.observer.on_log_stopped(key);

        self.maybe_start_upload();
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retention
    // ─────────────────────────────────────────────────────────────────────────

    pub fn prune_expired_logs(&mut self) -> PruneStats {
        let now = self.now();
        self.prune_at(now)
    }

    pub fn prune_at(&mut self, now: DateTime<Utc>) -> PruneStats {
        let stats = self.pending.prune(now, &mut self.quota);
        if stats.logs_removed > 0 {
            info!(
                removed = stats.logs_removed,
                delete_errors = stats.errors.len(),
                "Pruned expired logs"
            );
        }
        stats
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Uploads
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts uploading the oldest pending log, unless an upload is already
    /// running, nothing is pending, or any session is alive.
    pub fn maybe_start_upload(&mut self) {
        // Never upload a log that just expired.
        self.prune_expired_logs();

        if self.uploads.is_busy() || self.pending.is_empty() {
            return;
        }
        if !self.uploading_allowed() {
            debug!(
                live_sessions = self.sessions.len(),
                "Uploading deferred while sessions are alive"
            );
            return;
        }

        let Some(log) = self.pending.pop_front() else {
            return;
        };
        let profile = log.profile;
        let path = log.path.clone();

        // A failed upload is not retried; the log is gone once handed over.
        match self.uploads.start(log) {
            Ok(upload_id) => {
                self.quota.on_log_uploaded_or_expired(profile);
                info!(upload_id, profile = %profile, path = %path.display(), "Upload started");
            }
            Err(log) => {
                error!(path = %path.display(), "Upload slot unexpectedly busy");
                self.pending.push_front(log);
            }
        }
    }

    fn uploading_allowed(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Handles an uploader's result: frees the slot, deletes the file, and
    /// moves on to the next pending log. Stale results are ignored.
    ///
    /// Returns false if the result did not belong to the in-flight upload.
    pub fn on_upload_complete(&mut self, result: UploadResult) -> bool {
        let Some(log) = self.uploads.finish(&result) else {
            debug!(
                upload_id = result.upload_id,
                path = %result.path.display(),
                "Ignoring result of discarded upload"
            );
            return false;
        };

        if result.success {
            info!(upload_id = result.upload_id, path = %log.path.display(), "Upload complete");
        } else {
            warn!(
                upload_id = result.upload_id,
                path = %log.path.display(),
                "Upload failed; log dropped"
            );
        }
        remove_uploaded_file(&log.path);

        self.maybe_start_upload();
        true
    }

    /// Applies every upload result already delivered. Returns how many were handled.
    pub fn process_upload_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Some(result) = self.uploads.try_recv() {
            self.on_upload_complete(result);
            handled += 1;
        }
        handled
    }

    /// Blocks up to `timeout` for one upload result and applies it.
    ///
    /// Returns true only if the result completed the in-flight upload.
    pub fn wait_for_upload(&mut self, timeout: Duration) -> bool {
        match self.uploads.recv_timeout(timeout) {
            Some(result) => self.on_upload_complete(result),
            None => false,
        }
    }

    /// Replaces the uploader factory. Any in-flight upload object is
    /// discarded (its file stays on disk) and a new upload is attempted.
    pub fn set_uploader_factory(&mut self, factory: Box<dyn UploaderFactory>) {
        if let Some(log) = self.uploads.replace_factory(factory) {
            info!(path = %log.path.display(), "Discarded in-flight upload");
        }
        self.maybe_start_upload();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn quota(&self, profile: ProfileId) -> QuotaSnapshot {
        self.quota.get(profile)
    }

    /// Whether a new log for `profile` would be admitted right now.
    /// Expired pending logs are pruned before the check.
    pub fn can_admit(&mut self, profile: ProfileId) -> bool {
        self.prune_expired_logs();
        self.quota.can_admit(profile)
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = SessionKey> + '_ {
        self.sessions.iter()
    }

    pub fn is_logging(&self, key: SessionKey) -> bool {
        self.active_logs.contains_key(&key)
    }

    pub fn active_log_path(&self, key: SessionKey) -> Option<&Path> {
        self.active_logs.get(&key).map(|log| log.path())
    }

    pub fn active_log_count(&self, profile: ProfileId) -> usize {
        self.active_logs
            .values()
            .filter(|log| log.profile() == profile)
            .count()
    }

    pub fn total_active_logs(&self) -> usize {
        self.active_logs.len()
    }

    pub fn pending_logs(&self) -> impl Iterator<Item = &PendingLog> {
        self.pending.iter()
    }

    pub fn pending_log_count(&self, profile: ProfileId) -> usize {
        self.pending.count_for(profile)
    }

    pub fn upload_in_progress(&self) -> Option<&PendingLog> {
        self.uploads.in_flight()
    }

    fn is_tracked_path(&self, path: &Path) -> bool {
        self.pending.iter().any(|log| log.path == path)
            || self.active_logs.values().any(|log| log.path() == path)
            || self.uploads.uploading_path() == Some(path)
    }
}

fn remove_uploaded_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Uploaded log already removed");
        }
        Err(err) => {
            warn!(error = %err, path = %path.display(), "Failed to delete uploaded log");
        }
    }
}
