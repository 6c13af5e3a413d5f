//! Disk persistence of the active index generation.
//!
//! The snapshot sits next to the cache manifest so a restart can serve queries without
//! re-embedding. A missing or unreadable snapshot is not fatal: the next `sync` treats every
//! document without indexed chunks as changed.

use super::{DocumentEntry, IndexGeneration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File name of the snapshot inside the cache directory.
pub const SNAPSHOT_FILE: &str = "index_snapshot.json";
const SNAPSHOT_VERSION: u32 = 1;

/// Errors raised while reading or writing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem access failed.
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file exists but is not a valid snapshot.
    #[error("snapshot {path} is corrupt: {reason}")]
    Corrupt {
        /// Snapshot path.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    generation: u64,
    built_at: &'a str,
    documents: Vec<&'a DocumentEntry>,
}

#[derive(Deserialize)]
struct SnapshotFile {
    version: u32,
    generation: u64,
    built_at: String,
    documents: Vec<DocumentEntry>,
}

/// Path of the snapshot within `cache_dir`.
pub fn snapshot_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(SNAPSHOT_FILE)
}

/// Write `generation` atomically (temporary file plus rename).
pub fn save(path: &Path, generation: &IndexGeneration) -> Result<(), SnapshotError> {
    let file = SnapshotRef {
        version: SNAPSHOT_VERSION,
        generation: generation.id(),
        built_at: generation.built_at(),
        documents: generation
            .documents()
            .values()
            .map(|entry| entry.as_ref())
            .collect(),
    };
    let bytes = serde_json::to_vec(&file).map_err(|error| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })?;
    crate::ingestion::write_atomic(path, &bytes).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a snapshot; `Ok(None)` when no snapshot has been written yet.
pub fn load(path: &Path) -> Result<Option<IndexGeneration>, SnapshotError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let file: SnapshotFile =
        serde_json::from_slice(&bytes).map_err(|error| SnapshotError::Corrupt {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
    if file.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported snapshot version {}", file.version),
        });
    }
    let documents: BTreeMap<String, Arc<DocumentEntry>> = file
        .documents
        .into_iter()
        .map(|entry| (entry.document.id.clone(), Arc::new(entry)))
        .collect();
    Ok(Some(IndexGeneration::restore(
        file.generation,
        file.built_at,
        documents,
    )))
}
