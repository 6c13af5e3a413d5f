//! Request-boundary errors and response types of the insight service.

use crate::answer::AnswerError;
use crate::feedback::FeedbackValidationError;
use crate::ingestion::{
    ChunkingError, DocumentKind, IngestionReport, SourceDocument, SyncError, WatchedDirectory,
};
use crate::metrics::MetricsSnapshot;
use crate::resilience::CapabilityError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to callers of the insight service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or malformed caller input.
    #[error("{0}")]
    Validation(String),
    /// The index or a capability is not available yet.
    #[error("{0}")]
    NotReady(String),
    /// An external capability failed after retries.
    #[error("external service failed: {message}")]
    ExternalService {
        /// Failure description.
        message: String,
        /// Whether repeating the request may succeed.
        retryable: bool,
    },
    /// Upload of a file kind that cannot be ingested.
    #[error("unsupported file kind: {0}")]
    UnsupportedFileKind(String),
    /// Unknown identifier.
    #[error("{0}")]
    NotFound(String),
    /// A sync is already running.
    #[error("a sync is already in progress")]
    SyncInProgress,
    /// Writing files, the manifest, or the snapshot failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotReady(_) => "not_ready",
            Self::ExternalService { .. } => "external_service_error",
            Self::UnsupportedFileKind(_) => "unsupported_file_kind",
            Self::NotFound(_) => "not_found",
            Self::SyncInProgress => "sync_in_progress",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExternalService { retryable, .. } => *retryable,
            Self::NotReady(_) | Self::SyncInProgress => true,
            _ => false,
        }
    }
}

impl From<CapabilityError> for ServiceError {
    fn from(error: CapabilityError) -> Self {
        Self::ExternalService {
            retryable: error.is_retryable(),
            message: error.to_string(),
        }
    }
}

impl From<AnswerError> for ServiceError {
    fn from(error: AnswerError) -> Self {
        match error {
            AnswerError::EmptyQuestion => Self::Validation("question is required".into()),
            AnswerError::NotReady => Self::NotReady(
                "no document index has been built yet; run a reload or upload a document".into(),
            ),
            AnswerError::Capability(error) => error.into(),
        }
    }
}

impl From<FeedbackValidationError> for ServiceError {
    fn from(error: FeedbackValidationError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<SyncError> for ServiceError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::InProgress => Self::SyncInProgress,
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Errors raised while assembling the service at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A capability client could not be built.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// Chunking configuration is invalid.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
}

/// Outcome of storing and indexing an uploaded file.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    /// Stored file name.
    pub file_name: String,
    /// Document kind inferred from the extension.
    pub kind: DocumentKind,
    /// Path the file was written to.
    pub stored_path: String,
    /// Whether the file made it into the active index.
    pub indexed: bool,
    /// Report of the targeted sync; absent when another sync was running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestionReport>,
}

/// Summary of a forced full sync.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    /// Documents added, updated, or removed.
    pub changed: usize,
    /// Full sync report.
    #[serde(flatten)]
    pub report: IngestionReport,
}

/// State of the active index generation.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// Whether a generation has been published.
    pub ready: bool,
    /// Active generation id.
    pub generation: Option<u64>,
    /// Build timestamp of the active generation.
    pub built_at: Option<String>,
    /// Indexed documents.
    pub documents: usize,
    /// Indexed chunks.
    pub chunks: usize,
    /// Whether a sync is running.
    pub syncing: bool,
}

/// Readiness of an external capability.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityStatus {
    /// Whether the capability is configured and its latest call did not fail.
    pub ready: bool,
    /// Model or provider identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Introspection payload.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    /// Crate version.
    pub version: &'static str,
    /// Index readiness and size.
    pub index: IndexStatus,
    /// Embedding capability.
    pub embedding: CapabilityStatus,
    /// Feedback analyzer capability.
    pub analyzer: CapabilityStatus,
    /// Messaging gateway.
    pub messaging: CapabilityStatus,
    /// Watched directories.
    pub directories: Vec<WatchedDirectory>,
    /// Manifest entries.
    pub documents: Vec<SourceDocument>,
    /// Activity counters.
    pub metrics: MetricsSnapshot,
}

/// Inbound message from the messaging gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Sender address.
    pub from: String,
    /// Message text.
    pub body: String,
}
