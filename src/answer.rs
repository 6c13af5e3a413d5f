//! Retrieval-augmented answers grounded in the active index generation.

use crate::embedding::EmbeddingClient;
use crate::generation::{GenerationClient, GenerationRequest};
use crate::index::{SearchHit, VectorIndex};
use crate::ingestion::{DocumentKind, current_timestamp_rfc3339};
use crate::resilience::CapabilityError;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Reply used when retrieval finds nothing to ground an answer in.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have enough information in the available documents to answer this question.";

const DEFAULT_TOP_K: usize = 4;
const PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are an assistant for a hospital. Answer strictly from the \
provided document passages. If the passages do not contain the answer, say that the available \
information is insufficient instead of guessing. Cite the document names you relied on. Reply in \
the same language as the question.";

/// Errors raised while answering a question.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// The question was blank.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// No index generation has been published yet.
    #[error("document index is not ready")]
    NotReady,
    /// Embedding or generation failed after retries.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// A document cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCitation {
    /// Document identifier.
    pub document: String,
    /// File name.
    pub name: String,
    /// Document kind.
    pub kind: DocumentKind,
    /// Best passage score within the document.
    pub score: f32,
}

/// A retrieved passage shown as evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassageEvidence {
    /// Document identifier.
    pub document: String,
    /// File name.
    pub name: String,
    /// Document kind.
    pub kind: DocumentKind,
    /// Chunk position within the document.
    pub ordinal: usize,
    /// Similarity score.
    pub score: f32,
    /// Leading characters of the passage.
    pub preview: String,
}

/// Grounded answer with provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Question as received, trimmed.
    pub question: String,
    /// Answer text.
    pub answer: String,
    /// Cited documents, one per document, best score first.
    pub sources: Vec<SourceCitation>,
    /// Retrieved passages in rank order.
    pub passages: Vec<PassageEvidence>,
    /// Identifier of this answering run.
    pub processing_id: Uuid,
    /// Index generation the answer was computed against.
    pub generation: u64,
    /// RFC3339 timestamp.
    pub answered_at: String,
}

/// Answers questions from the passages of the active index generation.
pub struct AnswerSynthesizer {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    generator: Arc<dyn GenerationClient>,
    top_k: usize,
    temperature: f32,
}

impl AnswerSynthesizer {
    /// Create a synthesizer retrieving four passages per question.
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingClient>,
        generator: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            top_k: DEFAULT_TOP_K,
            temperature: 0.2,
        }
    }

    /// Number of passages retrieved per question.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Sampling temperature for answer generation.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Whether an index generation is available.
    pub fn is_ready(&self) -> bool {
        self.index.is_ready()
    }

    /// Answer `question` against the generation active when the call starts.
    pub async fn answer(&self, question: &str) -> Result<Answer, AnswerError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AnswerError::EmptyQuestion);
        }
        let generation = self.index.current().ok_or(AnswerError::NotReady)?;
        let processing_id = Uuid::new_v4();

        let query = self
            .embedder
            .embed(vec![question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CapabilityError::InvalidResponse("no embedding returned for question".into())
            })?;
        let hits = generation.search(&query, self.top_k);

        let answer = if hits.is_empty() {
            tracing::info!(%processing_id, generation = generation.id(), "No passages retrieved");
            INSUFFICIENT_INFORMATION.to_string()
        } else {
            let reply = self
                .generator
                .generate(GenerationRequest {
                    prompt: build_prompt(question, &hits),
                    system: Some(SYSTEM_PROMPT.to_string()),
                    temperature: self.temperature,
                })
                .await?;
            let reply = reply.trim();
            if reply.is_empty() {
                INSUFFICIENT_INFORMATION.to_string()
            } else {
                reply.to_string()
            }
        };

        let sources = cite_sources(&hits);
        tracing::info!(
            %processing_id,
            generation = generation.id(),
            passages = hits.len(),
            sources = sources.len(),
            "Question answered"
        );
        Ok(Answer {
            question: question.to_string(),
            answer,
            sources,
            passages: hits.iter().map(evidence).collect(),
            processing_id,
            generation: generation.id(),
            answered_at: current_timestamp_rfc3339(),
        })
    }
}

fn build_prompt(question: &str, hits: &[SearchHit<'_>]) -> String {
    let mut prompt = String::from("Document passages:\n\n");
    for (position, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] {} ({}, passage {})\n{}\n",
            position + 1,
            hit.document.name,
            hit.document.kind.as_str(),
            hit.chunk.ordinal + 1,
            hit.chunk.text.trim()
        );
    }
    let _ = write!(
        prompt,
        "Question: {question}\n\nAnswer using only the passages above. If they do not contain \
         the answer, state that the information is insufficient."
    );
    prompt
}

fn cite_sources(hits: &[SearchHit<'_>]) -> Vec<SourceCitation> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.document.id.as_str()))
        .map(|hit| SourceCitation {
            document: hit.document.id.clone(),
            name: hit.document.name.clone(),
            kind: hit.document.kind,
            score: hit.score,
        })
        .collect()
}

fn evidence(hit: &SearchHit<'_>) -> PassageEvidence {
    PassageEvidence {
        document: hit.document.id.clone(),
        name: hit.document.name.clone(),
        kind: hit.document.kind,
        ordinal: hit.chunk.ordinal,
        score: hit.score,
        preview: hit.chunk.text.chars().take(PREVIEW_CHARS).collect(),
    }
}
