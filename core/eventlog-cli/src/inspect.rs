//! `inspect`: decode a stored log's header and metadata.

use rtc_eventlog::read_log_file;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub path: String,
    pub version: u8,
    pub metadata_len: u32,
    /// Metadata as lossy UTF-8.
    pub metadata: String,
    pub payload_len: usize,
}

pub fn inspect(path: &Path) -> Result<InspectReport, String> {
    let stored = read_log_file(path)?;
    Ok(InspectReport {
        path: path.display().to_string(),
        version: stored.header.version,
        metadata_len: stored.header.metadata_len,
        metadata: String::from_utf8_lossy(&stored.metadata).into_owned(),
        payload_len: stored.payload.len(),
    })
}

pub fn run(path: &Path, json: bool) -> Result<(), String> {
    let report = inspect(path)?;

    if json {
        let output = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Failed to serialize report: {}", e))?;
        println!("{}", output);
        return Ok(());
    }

    println!("path:         {}", report.path);
    println!("version:      {}", report.version);
    println!("metadata:     {} bytes", report.metadata_len);
    if !report.metadata.is_empty() {
        println!("              {}", report.metadata);
    }
    println!("payload:      {} bytes", report.payload_len);
    Ok(())
}
