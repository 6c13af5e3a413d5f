//! Content fingerprints, timestamps, and atomic file writes.

use sha2::{Digest, Sha256};
use std::fs::Metadata;
use std::io::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Identity of a file's contents at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    /// SHA-256 of the contents, hex encoded.
    pub fingerprint: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Modification time in unix seconds (0 when unavailable).
    pub modified_at: i64,
}

impl FileStamp {
    /// Stamp file contents read from disk together with their metadata.
    pub fn new(bytes: &[u8], metadata: &Metadata) -> Self {
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default();
        Self {
            fingerprint: sha256_hex(bytes),
            size_bytes: bytes.len() as u64,
            modified_at,
        }
    }
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Current UTC time as RFC3339.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Replace `path` with `bytes` through a sibling temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}
