//! Service object shared by every request handler.

use super::types::{
    CapabilityStatus, InboundMessage, IndexStatus, ReloadSummary, ServiceError, StartupError,
    SystemInfo, UploadOutcome,
};
use crate::answer::{Answer, AnswerSynthesizer};
use crate::config::Config;
use crate::embedding::{EmbeddingClient, TrackedEmbeddingClient, build_embedding_client};
use crate::feedback::{
    ContextualAnalyzer, FeedbackAnalysis, FeedbackContext, FeedbackPipeline, FeedbackRequest,
};
use crate::generation::build_generation_client;
use crate::index::VectorIndex;
use crate::ingestion::{
    DocumentKind, IngestionCoordinator, IngestionReport, SyncError, SyncScope, TextChunker,
    WatchedDirectory, write_atomic,
};
use crate::messaging::{
    MessageStatus, MessagingGateway, OutboundMessage, TwilioGateway, is_message_sid,
};
use crate::metrics::{CapabilityHealth, ServiceMetrics};
use crate::resilience::CapabilityError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Longest reply sent back over the messaging channel.
pub const MAX_RELAY_CHARS: usize = 1500;
const RELAY_TRUNCATION_SUFFIX: &str = "... For more details, please contact us directly.";
const RELAY_GREETING: &str = "Hello! Ask me a question about our hospital services and I will \
answer from our documents.";
const RELAY_UNAVAILABLE: &str = "Our document assistant is temporarily unavailable. Please try \
again in a few minutes or contact us directly.";
const RELAY_FAILURE: &str = "Sorry, I could not process your question right now. Please try \
again later or contact us directly.";

/// Operations exposed to the HTTP surface and the CLI.
#[async_trait]
pub trait InsightApi: Send + Sync {
    /// Answer a question from the indexed documents.
    async fn answer(&self, question: &str) -> Result<Answer, ServiceError>;

    /// Validate and analyze a feedback item.
    async fn analyze_feedback(
        &self,
        request: FeedbackRequest,
    ) -> Result<FeedbackAnalysis, ServiceError>;

    /// Store an uploaded file in its kind's directory and index it.
    async fn ingest_upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, ServiceError>;

    /// Manifest summary, readiness flags, and counters.
    fn system_info(&self) -> SystemInfo;

    /// Synchronize every watched directory.
    async fn reload(&self) -> Result<ReloadSummary, ServiceError>;

    /// Send a message through the gateway.
    async fn send_message(&self, message: OutboundMessage) -> Result<MessageStatus, ServiceError>;

    /// Delivery status of a sent message.
    async fn message_status(&self, sid: &str) -> Result<MessageStatus, ServiceError>;

    /// Reply text for an inbound gateway message.
    async fn relay_inbound(&self, message: InboundMessage) -> String;
}

/// Production implementation of [`InsightApi`].
pub struct InsightService {
    coordinator: Arc<IngestionCoordinator>,
    embedder: Arc<dyn EmbeddingClient>,
    answers: AnswerSynthesizer,
    feedback: FeedbackPipeline,
    messaging: Option<Arc<dyn MessagingGateway>>,
    metrics: ServiceMetrics,
    embedding_health: Arc<CapabilityHealth>,
}

impl InsightService {
    /// Assemble a service from already-built components.
    pub fn new(
        coordinator: Arc<IngestionCoordinator>,
        embedder: Arc<dyn EmbeddingClient>,
        answers: AnswerSynthesizer,
        feedback: FeedbackPipeline,
    ) -> Self {
        Self {
            coordinator,
            embedder,
            answers,
            feedback,
            messaging: None,
            metrics: ServiceMetrics::new(),
            embedding_health: Arc::new(CapabilityHealth::default()),
        }
    }

    /// Report embedding readiness from `health`, shared with a [`TrackedEmbeddingClient`].
    pub fn with_embedding_health(mut self, health: Arc<CapabilityHealth>) -> Self {
        self.embedding_health = health;
        self
    }

    /// Enable the messaging relay.
    pub fn with_messaging(mut self, gateway: Arc<dyn MessagingGateway>) -> Self {
        self.messaging = Some(gateway);
        self
    }

    /// Build every component from configuration and restore persisted state.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let embedding_health = Arc::new(CapabilityHealth::default());
        let embedder: Arc<dyn EmbeddingClient> = Arc::new(TrackedEmbeddingClient::new(
            build_embedding_client(config)?,
            embedding_health.clone(),
        ));
        let generator = build_generation_client(config)?;
        let chunker = TextChunker::from_config(&config.chunking)?;
        let index = Arc::new(VectorIndex::new());

        let directories = vec![
            WatchedDirectory {
                kind: DocumentKind::Paginated,
                path: config.directories.paginated.clone(),
            },
            WatchedDirectory {
                kind: DocumentKind::Tabular,
                path: config.directories.tabular.clone(),
            },
        ];
        let coordinator = IngestionCoordinator::new(
            directories,
            config.directories.cache.clone(),
            chunker,
            embedder.clone(),
            index.clone(),
        )
        .with_batch_size(config.embedding.batch_size);
        coordinator.restore();

        let answers = AnswerSynthesizer::new(index, embedder.clone(), generator.clone())
            .with_top_k(config.retrieval_top_k)
            .with_temperature(config.generation.temperature);
        let feedback = FeedbackPipeline::new(ContextualAnalyzer::new(generator), config.risk);

        let mut service = Self::new(Arc::new(coordinator), embedder, answers, feedback)
            .with_embedding_health(embedding_health);
        match &config.messaging {
            Some(twilio) => {
                let gateway = TwilioGateway::new(twilio.clone(), config.resilience)?;
                service = service.with_messaging(Arc::new(gateway));
            }
            None => tracing::info!("Messaging gateway not configured; relay disabled"),
        }
        Ok(service)
    }

    /// Ingestion coordinator backing this service.
    pub fn coordinator(&self) -> &Arc<IngestionCoordinator> {
        &self.coordinator
    }

    fn gateway(&self) -> Result<&Arc<dyn MessagingGateway>, ServiceError> {
        self.messaging
            .as_ref()
            .ok_or_else(|| ServiceError::NotReady("messaging gateway is not configured".into()))
    }

    fn index_status(&self) -> IndexStatus {
        let active = self.coordinator.index().current();
        IndexStatus {
            ready: active.is_some(),
            generation: active.as_ref().map(|generation| generation.id()),
            built_at: active
                .as_ref()
                .map(|generation| generation.built_at().to_string()),
            documents: active
                .as_ref()
                .map_or(0, |generation| generation.document_count()),
            chunks: active.as_ref().map_or(0, |generation| generation.chunk_count()),
            syncing: self.coordinator.is_syncing(),
        }
    }

    fn record_sync(&self, report: &IngestionReport) {
        self.metrics.record_sync(
            (report.added.len() + report.updated.len()) as u64,
            report.chunks_embedded as u64,
        );
    }
}

#[async_trait]
impl InsightApi for InsightService {
    async fn answer(&self, question: &str) -> Result<Answer, ServiceError> {
        let answer = self.answers.answer(question).await?;
        self.metrics.record_answer();
        Ok(answer)
    }

    async fn analyze_feedback(
        &self,
        request: FeedbackRequest,
    ) -> Result<FeedbackAnalysis, ServiceError> {
        let context = FeedbackContext::try_from(request)?;
        let analysis = self.feedback.analyze(context).await;
        self.metrics.record_feedback(analysis.degraded);
        Ok(analysis)
    }

    async fn ingest_upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, ServiceError> {
        let name = Path::new(file_name.trim())
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ServiceError::Validation("a file name is required".into()))?;
        if bytes.is_empty() {
            return Err(ServiceError::Validation(format!("{name} is empty")));
        }
        let kind = DocumentKind::from_path(Path::new(&name)).ok_or_else(|| {
            ServiceError::UnsupportedFileKind(format!("{name}; accepted kinds are .pdf and .xlsx"))
        })?;
        let directory = self
            .coordinator
            .directory_for(kind)
            .ok_or_else(|| ServiceError::UnsupportedFileKind(name.clone()))?;

        let path = directory.join(&name);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|error| ServiceError::Storage(error.to_string()))?
            .map_err(|error| ServiceError::Storage(format!("{}: {error}", path.display())))?;
        tracing::info!(file = %path.display(), kind = kind.as_str(), "Stored uploaded file");

        let stored_path = path.to_string_lossy().into_owned();
        match self.coordinator.sync(SyncScope::Files(vec![path])).await {
            Ok(report) => {
                self.record_sync(&report);
                let indexed = !report
                    .failed
                    .iter()
                    .any(|failure| failure.document == stored_path);
                Ok(UploadOutcome {
                    file_name: name,
                    kind,
                    stored_path,
                    indexed,
                    report: Some(report),
                })
            }
            Err(SyncError::InProgress) => {
                tracing::info!(file = %stored_path, "Sync running; upload will be indexed by the next sync");
                Ok(UploadOutcome {
                    file_name: name,
                    kind,
                    stored_path,
                    indexed: false,
                    report: None,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            version: env!("CARGO_PKG_VERSION"),
            index: self.index_status(),
            embedding: CapabilityStatus {
                ready: self.embedding_health.is_healthy(),
                model: Some(self.embedder.model().to_string()),
            },
            analyzer: CapabilityStatus {
                ready: self.metrics.analyzer_healthy(),
                model: Some(self.feedback.model().to_string()),
            },
            messaging: CapabilityStatus {
                ready: self.messaging.is_some(),
                model: self.messaging.as_ref().map(|_| "twilio-whatsapp".to_string()),
            },
            directories: self.coordinator.directories().to_vec(),
            documents: self.coordinator.manifest().documents().cloned().collect(),
            metrics: self.metrics.snapshot(),
        }
    }

    async fn reload(&self) -> Result<ReloadSummary, ServiceError> {
        let report = self.coordinator.sync_all().await?;
        self.record_sync(&report);
        Ok(ReloadSummary {
            changed: report.changed(),
            report,
        })
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<MessageStatus, ServiceError> {
        if message.to.trim().is_empty() {
            return Err(ServiceError::Validation("recipient `to` is required".into()));
        }
        if message.body.trim().is_empty() {
            return Err(ServiceError::Validation("message body is required".into()));
        }
        Ok(self.gateway()?.send(message).await?)
    }

    async fn message_status(&self, sid: &str) -> Result<MessageStatus, ServiceError> {
        if !is_message_sid(sid) {
            return Err(ServiceError::Validation(format!(
                "message sid must be letters and digits only, got {sid:?}"
            )));
        }
        match self.gateway()?.status(sid).await {
            Ok(status) => Ok(status),
            Err(CapabilityError::Rejected { status: 404, .. }) => {
                Err(ServiceError::NotFound(format!("message {sid} not found")))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn relay_inbound(&self, message: InboundMessage) -> String {
        let question = message.body.trim();
        if question.is_empty() {
            return RELAY_GREETING.to_string();
        }
        tracing::info!(from = %message.from, "Relaying inbound message");
        compose_relay_reply(self.answer(question).await)
    }
}

/// Turn an answering result into a message-sized reply.
pub fn compose_relay_reply(result: Result<Answer, ServiceError>) -> String {
    match result {
        Ok(answer) => truncate_reply(&answer.answer),
        Err(ServiceError::NotReady(_)) => RELAY_UNAVAILABLE.to_string(),
        Err(error) => {
            tracing::warn!(error = %error, "Relay answer failed");
            RELAY_FAILURE.to_string()
        }
    }
}

fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= MAX_RELAY_CHARS {
        return text.to_string();
    }
    let keep = MAX_RELAY_CHARS - RELAY_TRUNCATION_SUFFIX.chars().count();
    let mut reply: String = text.chars().take(keep).collect();
    reply.push_str(RELAY_TRUNCATION_SUFFIX);
    reply
}
