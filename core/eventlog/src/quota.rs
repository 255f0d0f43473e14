//! Per-profile and global log quotas.
//!
//! Counters are a cache over the active and pending entity sets. Every
//! mutation of those sets goes through exactly one of the `on_*` hooks here.

use serde::Serialize;
use std::collections::HashMap;
use tracing::error;

use crate::error::StartLoggingError;
use crate::types::{ProfileId, MAX_ACTIVE_LOGS, MAX_PENDING_LOGS_PER_PROFILE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub active: usize,
    pub pending: usize,
}

impl QuotaSnapshot {
    pub fn total(&self) -> usize {
        self.active + self.pending
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuotaCounters {
    profiles: HashMap<ProfileId, QuotaSnapshot>,
}

impl QuotaCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets a profile's counters, returning their last value.
    pub fn forget(&mut self, profile: ProfileId) -> Option<QuotaSnapshot> {
        self.profiles.remove(&profile)
    }

    pub fn get(&self, profile: ProfileId) -> QuotaSnapshot {
        self.profiles.get(&profile).copied().unwrap_or_default()
    }

    pub fn total_active(&self) -> usize {
        self.profiles.values().map(|counts| counts.active).sum()
    }

    pub fn check_admission(&self, profile: ProfileId) -> Result<(), StartLoggingError> {
        if self.total_active() >= MAX_ACTIVE_LOGS {
            return Err(StartLoggingError::ActiveLogLimit {
                limit: MAX_ACTIVE_LOGS,
            });
        }
        if self.get(profile).total() >= MAX_PENDING_LOGS_PER_PROFILE {
            return Err(StartLoggingError::ProfileQuotaExceeded {
                profile,
                limit: MAX_PENDING_LOGS_PER_PROFILE,
            });
        }
        Ok(())
    }

    pub fn can_admit(&self, profile: ProfileId) -> bool {
        self.check_admission(profile).is_ok()
    }

    pub fn on_log_started(&mut self, profile: ProfileId) {
        self.profiles.entry(profile).or_default().active += 1;
    }

    pub fn on_log_finalized_to_pending(&mut self, profile: ProfileId) {
        let counts = self.profiles.entry(profile).or_default();
        decrement(&mut counts.active, profile, "active");
        counts.pending += 1;
    }

    /// Active log closed without becoming pending (profile being disabled).
    pub fn on_log_abandoned(&mut self, profile: ProfileId) {
        let counts = self.profiles.entry(profile).or_default();
        decrement(&mut counts.active, profile, "active");
    }

    /// Pending log found on disk at profile-enable time. Does not consult the global cap.
    pub fn on_pending_discovered(&mut self, profile: ProfileId) {
        self.profiles.entry(profile).or_default().pending += 1;
    }

    pub fn on_log_uploaded_or_expired(&mut self, profile: ProfileId) {
        let counts = self.profiles.entry(profile).or_default();
        decrement(&mut counts.pending, profile, "pending");
    }
}

fn decrement(counter: &mut usize, profile: ProfileId, which: &str) {
    if *counter == 0 {
        error!(profile = %profile, counter = which, "Quota counter underflow");
        return;
    }
    *counter -= 1;
}
