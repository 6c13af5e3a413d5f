//! Durable record of processed source files.
//!
//! The manifest maps document ids to [`SourceDocument`] metadata and is rewritten atomically
//! after every `sync` that changed something.

use super::fingerprint::write_atomic;
use super::types::SourceDocument;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the manifest inside the cache directory.
pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

/// Errors raised while reading or writing the manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Filesystem access failed.
    #[error("manifest I/O failed for {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file exists but could not be decoded.
    #[error("manifest {path} is corrupt: {reason}")]
    Corrupt {
        /// Manifest path.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },
}

/// Mapping from document id to processing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    version: u32,
    documents: BTreeMap<String, SourceDocument>,
}

impl Default for CacheManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            documents: BTreeMap::new(),
        }
    }

    /// Path of the manifest within `cache_dir`.
    pub fn path_in(cache_dir: &Path) -> PathBuf {
        cache_dir.join(MANIFEST_FILE)
    }

    /// Load the manifest at `path`; a missing file yields an empty manifest.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(source) => {
                return Err(ManifestError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|error| ManifestError::Corrupt {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })
    }

    /// Persist the manifest atomically.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|error| ManifestError::Corrupt {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        write_atomic(path, &bytes).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Entry for `document_id`.
    pub fn get(&self, document_id: &str) -> Option<&SourceDocument> {
        self.documents.get(document_id)
    }

    /// Insert or replace an entry.
    pub fn upsert(&mut self, document: SourceDocument) {
        self.documents.insert(document.id.clone(), document);
    }

    /// Remove an entry, returning it when present.
    pub fn remove(&mut self, document_id: &str) -> Option<SourceDocument> {
        self.documents.remove(document_id)
    }

    /// Entries in id order.
    pub fn documents(&self) -> impl Iterator<Item = &SourceDocument> {
        self.documents.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
