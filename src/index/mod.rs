//! In-memory vector index built from immutable generations.
//!
//! A [`IndexGeneration`] is never mutated after construction. `sync` builds the next generation
//! off to the side and [`VectorIndex::publish`] swaps the active pointer; readers clone the
//! `Arc` once per request so a concurrent swap never changes what a single query sees.

mod generation;
pub mod snapshot;

pub use generation::{DocumentEntry, IndexGeneration, SearchHit, cosine_similarity};

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// A passage of extracted text and its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier derived from the document, ordinal, and content.
    pub id: Uuid,
    /// Identifier of the source document.
    pub document_id: String,
    /// Zero-based position within the document.
    pub ordinal: usize,
    /// Raw passage text.
    pub text: String,
    /// SHA-256 of the passage text.
    pub hash: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// Holder of the active index generation.
#[derive(Default)]
pub struct VectorIndex {
    active: RwLock<Option<Arc<IndexGeneration>>>,
}

impl VectorIndex {
    /// Create an index with no published generation.
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation visible to new readers, if any has been published.
    pub fn current(&self) -> Option<Arc<IndexGeneration>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a generation has ever been published.
    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    /// Atomically replace the active generation, returning the published handle.
    pub fn publish(&self, generation: IndexGeneration) -> Arc<IndexGeneration> {
        let generation = Arc::new(generation);
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(generation.clone());
        tracing::info!(
            generation = generation.id(),
            previous = previous.as_ref().map(|generation| generation.id()),
            documents = generation.document_count(),
            chunks = generation.chunk_count(),
            "Published index generation"
        );
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{DocumentKind, SourceDocument};
    use std::collections::BTreeMap;

    fn generation_with(id: u64, document_id: &str) -> IndexGeneration {
        let document = SourceDocument {
            id: document_id.into(),
            name: document_id.into(),
            kind: DocumentKind::Paginated,
            fingerprint: "abc".into(),
            size_bytes: 1,
            modified_at: 0,
            processed_at: "2026-01-01T00:00:00Z".into(),
            chunk_count: 1,
            sheets: Vec::new(),
        };
        let chunk = Chunk {
            id: Uuid::nil(),
            document_id: document_id.into(),
            ordinal: 0,
            text: "text".into(),
            hash: "h".into(),
            embedding: vec![1.0, 0.0],
        };
        let mut documents = BTreeMap::new();
        documents.insert(
            document_id.to_string(),
            Arc::new(DocumentEntry::new(document, vec![chunk])),
        );
        IndexGeneration::new(id, documents)
    }

    #[test]
    fn starts_without_generation() {
        let index = VectorIndex::new();
        assert!(!index.is_ready());
        assert!(index.current().is_none());
    }

    #[test]
    fn readers_keep_their_generation_across_swaps() {
        let index = VectorIndex::new();
        index.publish(generation_with(1, "a.pdf"));
        let held = index.current().expect("published");

        index.publish(generation_with(2, "b.pdf"));

        assert_eq!(held.id(), 1);
        assert!(held.document("a.pdf").is_some());
        let latest = index.current().expect("published");
        assert_eq!(latest.id(), 2);
        assert!(latest.document("a.pdf").is_none());
    }
}
