//! On-disk framing of remote-bound logs.
//!
//! ```text
//! +---------+------------------+----------------+---------------------------+
//! | version | metadata length  | metadata bytes | appended payload ...      |
//! | 8 bits  | 24 bits          |                |                           |
//! +---------+------------------+----------------+---------------------------+
//!  \___ 4 bytes, big-endian ___/
//! ```
//!
//! Appended payload is opaque: writes are concatenated with no extra framing.

use fs_err as fs;
use serde::Serialize;
use std::path::Path;

use crate::error::FormatError;

pub const LOG_FILE_VERSION: u8 = 0;
pub const HEADER_SIZE: usize = 4;
/// Largest metadata block whose length fits the 24-bit header field.
pub const MAX_METADATA_LEN: usize = 0xFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogHeader {
    pub version: u8,
    pub metadata_len: u32,
}

impl LogHeader {
    /// Header for the current format version, or `None` if the metadata is too long.
    pub fn for_metadata(metadata_len: usize) -> Option<Self> {
        if metadata_len > MAX_METADATA_LEN {
            return None;
        }
        Some(Self {
            version: LOG_FILE_VERSION,
            metadata_len: metadata_len as u32,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let raw = (u32::from(self.version) << 24) | (self.metadata_len & MAX_METADATA_LEN as u32);
        raw.to_be_bytes()
    }

    pub fn decode(bytes: [u8; HEADER_SIZE]) -> Self {
        let raw = u32::from_be_bytes(bytes);
        Self {
            version: (raw >> 24) as u8,
            metadata_len: raw & MAX_METADATA_LEN as u32,
        }
    }

    /// Bytes occupied by the header plus its metadata block.
    pub fn prefix_len(&self) -> usize {
        HEADER_SIZE + self.metadata_len as usize
    }
}

/// A log read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLog {
    pub header: LogHeader,
    pub metadata: Vec<u8>,
    pub payload: Vec<u8>,
}

pub fn parse_log(bytes: &[u8]) -> Result<StoredLog, FormatError> {
    let Some(header_bytes) = bytes.get(..HEADER_SIZE) else {
        return Err(FormatError::Truncated {
            expected: HEADER_SIZE,
            found: bytes.len(),
        });
    };
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(header_bytes);
    let header = LogHeader::decode(raw);

    if header.version != LOG_FILE_VERSION {
        return Err(FormatError::UnsupportedVersion(header.version));
    }

    let prefix_len = header.prefix_len();
    if bytes.len() < prefix_len {
        return Err(FormatError::Truncated {
            expected: prefix_len,
            found: bytes.len(),
        });
    }

    Ok(StoredLog {
        header,
        metadata: bytes[HEADER_SIZE..prefix_len].to_vec(),
        payload: bytes[prefix_len..].to_vec(),
    })
}

pub fn read_log_file(path: &Path) -> Result<StoredLog, FormatError> {
    let bytes = fs::read(path).map_err(|source| FormatError::Io {
        context: "Failed to read log file".to_string(),
        source,
    })?;
    parse_log(&bytes)
}
