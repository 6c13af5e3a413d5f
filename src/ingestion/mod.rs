//! Document ingestion: change detection, extraction, chunking, embedding, and publication.

pub mod chunking;
mod coordinator;
pub mod extract;
mod fingerprint;
pub mod manifest;
pub mod types;

pub use chunking::{ChunkingError, TextChunker};
pub use coordinator::IngestionCoordinator;
pub use extract::{
    Extraction, ExtractionError, Extractor, ExtractorSet, PaginatedExtractor, TabularExtractor,
};
pub use fingerprint::{FileStamp, current_timestamp_rfc3339, sha256_hex, write_atomic};
pub use manifest::{CacheManifest, ManifestError};
pub use types::{
    DocumentKind, IngestionFailure, IngestionReport, SheetPreview, SourceDocument, SyncError,
    SyncScope, WatchedDirectory,
};
