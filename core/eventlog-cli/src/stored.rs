//! `list` and `prune`: stored logs in one logs directory.

use chrono::{DateTime, Utc};
use rtc_eventlog::{
    is_expired, list_log_files, PendingLog, PendingLogs, ProfileId, PruneStats, QuotaCounters,
};
use serde::Serialize;
use std::path::Path;

/// Profile bucket for a standalone directory; quotas are not enforced here.
const DIRECTORY_PROFILE: ProfileId = ProfileId(0);

#[derive(Debug, Serialize)]
pub struct ListedLog {
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub age_hours: i64,
    pub expired: bool,
}

pub fn list(dir: &Path, now: DateTime<Utc>) -> Result<Vec<ListedLog>, String> {
    let logs = list_log_files(dir)?;
    Ok(logs
        .into_iter()
        .map(|log| ListedLog {
            path: log.path.display().to_string(),
            last_modified: log.last_modified,
            age_hours: now.signed_duration_since(log.last_modified).num_hours(),
            expired: is_expired(log.last_modified, now),
        })
        .collect())
}

/// Deletes expired logs using the same retention rule as the manager.
pub fn prune(dir: &Path, now: DateTime<Utc>) -> Result<PruneStats, String> {
    let mut pending = PendingLogs::new();
    let mut quota = QuotaCounters::new();
    for log in list_log_files(dir)? {
        pending.push(PendingLog {
            profile: DIRECTORY_PROFILE,
            path: log.path,
            last_modified: log.last_modified,
        });
        quota.on_pending_discovered(DIRECTORY_PROFILE);
    }

    let stats = pending.prune(now, &mut quota);
    tracing::info!(
        dir = %dir.display(),
        removed = stats.logs_removed,
        remaining = pending.len(),
        "Pruned logs directory"
    );
    Ok(stats)
}

pub fn run_list(dir: &Path, json: bool) -> Result<(), String> {
    let logs = list(dir, Utc::now())?;

    if json {
        let output = serde_json::to_string_pretty(&logs)
            .map_err(|e| format!("Failed to serialize listing: {}", e))?;
        println!("{}", output);
        return Ok(());
    }

    if logs.is_empty() {
        println!("No logs in {}", dir.display());
        return Ok(());
    }
    for log in &logs {
        let marker = if log.expired { " (expired)" } else { "" };
        println!("{:>6}h  {}{}", log.age_hours, log.path, marker);
    }
    Ok(())
}

pub fn run_prune(dir: &Path, json: bool) -> Result<(), String> {
    let stats = prune(dir, Utc::now())?;

    if json {
        let output = serde_json::to_string_pretty(&stats)
            .map_err(|e| format!("Failed to serialize prune stats: {}", e))?;
        println!("{}", output);
        return Ok(());
    }

    println!("Removed {} expired log(s)", stats.logs_removed);
    for error in &stats.errors {
        println!("  error: {}", error);
    }
    Ok(())
}
