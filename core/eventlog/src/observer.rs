//! Outbound notifications for display and debugging.

use std::path::Path;

use crate::types::SessionKey;

/// Receives lifecycle notifications, synchronously, on the manager's sequence.
pub trait RemoteLogObserver: Send {
    fn on_log_started(&mut self, key: SessionKey, path: &Path);
    fn on_log_stopped(&mut self, key: SessionKey);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RemoteLogObserver for NoopObserver {
    fn on_log_started(&mut self, _key: SessionKey, _path: &Path) {}
    fn on_log_stopped(&mut self, _key: SessionKey) {}
}
