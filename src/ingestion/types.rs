//! Core data types and error definitions for ingestion.

use super::manifest::ManifestError;
use crate::index::snapshot::SnapshotError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Kind tag selecting the extractor for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Page-oriented documents (PDF).
    Paginated,
    /// Spreadsheets (XLSX).
    Tabular,
}

impl DocumentKind {
    /// Infer the kind from a file extension; `None` for unsupported files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Paginated),
            "xlsx" => Some(Self::Tabular),
            _ => None,
        }
    }

    /// Lowercase label used in responses and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paginated => "paginated",
            Self::Tabular => "tabular",
        }
    }
}

/// Compact description of one spreadsheet sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetPreview {
    /// Sheet name from the workbook.
    pub name: String,
    /// Header row values.
    pub columns: Vec<String>,
    /// Data rows below the header.
    pub rows: usize,
    /// Non-empty data cells.
    pub non_empty_cells: usize,
}

/// Manifest entry for one on-disk file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Path of the file as discovered under its watched directory.
    pub id: String,
    /// File name shown in citations.
    pub name: String,
    /// Extractor variant used for the file.
    pub kind: DocumentKind,
    /// SHA-256 of the file contents.
    pub fingerprint: String,
    /// File size at processing time.
    pub size_bytes: u64,
    /// Modification time in unix seconds at processing time.
    pub modified_at: i64,
    /// RFC3339 timestamp of the last successful processing.
    pub processed_at: String,
    /// Number of chunks produced.
    pub chunk_count: usize,
    /// Sheet previews for tabular documents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sheets: Vec<SheetPreview>,
}

/// A directory scanned for documents of a single kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedDirectory {
    /// Documents accepted from this directory.
    pub kind: DocumentKind,
    /// Directory path.
    pub path: PathBuf,
}

/// Which files a `sync` run considers.
#[derive(Debug, Clone)]
pub enum SyncScope {
    /// Every supported file under the given directories. Manifest entries under these
    /// directories whose files are gone are purged.
    Directories(Vec<WatchedDirectory>),
    /// Only the listed files. A listed file that no longer exists is purged.
    Files(Vec<PathBuf>),
}

/// A file that could not be ingested during a `sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionFailure {
    /// Document identifier.
    pub document: String,
    /// Human-readable cause.
    pub reason: String,
}

/// Outcome of one `sync` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionReport {
    /// Documents seen for the first time.
    pub added: Vec<String>,
    /// Documents whose fingerprint changed.
    pub updated: Vec<String>,
    /// Documents purged because their file disappeared.
    pub removed: Vec<String>,
    /// Documents served from cache.
    pub unchanged: usize,
    /// Documents that failed and kept their previous state.
    pub failed: Vec<IngestionFailure>,
    /// Chunks sent to the embedding capability.
    pub chunks_embedded: usize,
    /// Embedding requests issued.
    pub embedding_calls: usize,
    /// Documents in the active generation after the run.
    pub total_documents: usize,
    /// Chunks in the active generation after the run.
    pub total_chunks: usize,
    /// Active generation id after the run.
    pub generation: Option<u64>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl IngestionReport {
    /// Number of documents added, updated, or removed.
    pub fn changed(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

/// Errors that abort an entire `sync` run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another `sync` is already running.
    #[error("a sync is already in progress")]
    InProgress,
    /// The manifest could not be persisted.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// The index snapshot could not be persisted.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// The persistence worker panicked or was cancelled.
    #[error("persistence worker failed: {0}")]
    Worker(String),
    /// A watched directory could not be prepared or scanned.
    #[error("failed to scan {path}: {source}")]
    Scan {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that fail a single document during ingestion.
#[derive(Debug, Error)]
pub(crate) enum DocumentError {
    #[error("failed to read file: {0}")]
    Read(#[from] std::io::Error),
    #[error(transparent)]
    Extraction(#[from] super::extract::ExtractionError),
    #[error("extraction worker failed: {0}")]
    Worker(String),
    #[error("embedding failed: {0}")]
    Embedding(#[from] crate::resilience::CapabilityError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_extension_case_insensitively() {
        assert_eq!(
            DocumentKind::from_path(Path::new("a/Report.PDF")),
            Some(DocumentKind::Paginated)
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("b/stats.xlsx")),
            Some(DocumentKind::Tabular)
        );
        assert_eq!(DocumentKind::from_path(Path::new("legacy.xls")), None);
        assert_eq!(DocumentKind::from_path(Path::new("notes")), None);
    }

    #[test]
    fn report_counts_changes() {
        let report = IngestionReport {
            added: vec!["a".into()],
            removed: vec!["b".into(), "c".into()],
            unchanged: 4,
            ..IngestionReport::default()
        };
        assert_eq!(report.changed(), 3);
    }
}
