use super::Chunk;
use crate::ingestion::{SourceDocument, current_timestamp_rfc3339};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A document and the chunks produced for it by one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    /// Manifest metadata captured when the chunks were built.
    pub document: SourceDocument,
    /// Chunks in ordinal order.
    pub chunks: Vec<Chunk>,
}

impl DocumentEntry {
    /// Pair a document with its chunks.
    pub fn new(document: SourceDocument, chunks: Vec<Chunk>) -> Self {
        Self { document, chunks }
    }
}

/// Immutable snapshot of every indexed document.
///
/// Entries are shared by `Arc` so unchanged documents move into the next generation without
/// copying their chunks.
#[derive(Debug, Clone)]
pub struct IndexGeneration {
    id: u64,
    built_at: String,
    documents: BTreeMap<String, Arc<DocumentEntry>>,
}

/// A ranked search result borrowed from a generation.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    /// Document the chunk belongs to.
    pub document: &'a SourceDocument,
    /// Matching chunk.
    pub chunk: &'a Chunk,
    /// Cosine similarity with the query.
    pub score: f32,
}

impl IndexGeneration {
    /// Build a generation stamped with the current time.
    pub fn new(id: u64, documents: BTreeMap<String, Arc<DocumentEntry>>) -> Self {
        Self::restore(id, current_timestamp_rfc3339(), documents)
    }

    /// Rebuild a generation with a known build timestamp.
    pub fn restore(
        id: u64,
        built_at: String,
        documents: BTreeMap<String, Arc<DocumentEntry>>,
    ) -> Self {
        Self {
            id,
            built_at,
            documents,
        }
    }

    /// Monotonic generation number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// RFC3339 build timestamp.
    pub fn built_at(&self) -> &str {
        &self.built_at
    }

    /// Entry for `document_id`, if indexed.
    pub fn document(&self, document_id: &str) -> Option<&Arc<DocumentEntry>> {
        self.documents.get(document_id)
    }

    /// All entries keyed by document id.
    pub fn documents(&self) -> &BTreeMap<String, Arc<DocumentEntry>> {
        &self.documents
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Number of chunks across all documents.
    pub fn chunk_count(&self) -> usize {
        self.documents.values().map(|entry| entry.chunks.len()).sum()
    }

    /// Rank chunks by cosine similarity with `query`.
    ///
    /// Results are sorted by non-increasing score; ties go to the more recently modified
    /// document, then to the lower document id, then to the earlier chunk. `k` is clamped to
    /// the number of chunks.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit<'_>> {
        let limit = k.min(self.chunk_count());
        if limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit<'_>> = self
            .documents
            .values()
            .flat_map(|entry| {
                entry.chunks.iter().map(move |chunk| SearchHit {
                    document: &entry.document,
                    chunk,
                    score: cosine_similarity(query, &chunk.embedding),
                })
            })
            .collect();

        hits.sort_by(rank_order);
        hits.truncate(limit);
        hits
    }
}

fn rank_order(a: &SearchHit<'_>, b: &SearchHit<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.document.modified_at.cmp(&a.document.modified_at))
        .then_with(|| a.document.id.cmp(&b.document.id))
        .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
}

/// Cosine similarity of two vectors; zero when either is empty, zero-length, or mismatched.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if score.is_nan() { 0.0 } else { score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::DocumentKind;
    use uuid::Uuid;

    fn entry(id: &str, modified_at: i64, embeddings: &[[f32; 2]]) -> (String, Arc<DocumentEntry>) {
        let chunks = embeddings
            .iter()
            .enumerate()
            .map(|(ordinal, embedding)| Chunk {
                id: Uuid::new_v4(),
                document_id: id.into(),
                ordinal,
                text: format!("{id} #{ordinal}"),
                hash: String::new(),
                embedding: embedding.to_vec(),
            })
            .collect::<Vec<_>>();
        let document = SourceDocument {
            id: id.into(),
            name: id.into(),
            kind: DocumentKind::Paginated,
            fingerprint: format!("fp-{id}"),
            size_bytes: 10,
            modified_at,
            processed_at: "2026-01-01T00:00:00Z".into(),
            chunk_count: chunks.len(),
            sheets: Vec::new(),
        };
        (id.to_string(), Arc::new(DocumentEntry::new(document, chunks)))
    }

    #[test]
    fn cosine_similarity_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_orders_by_score_and_clamps_k() {
        let generation = IndexGeneration::new(
            1,
            BTreeMap::from([
                entry("a.pdf", 10, &[[1.0, 0.0], [0.6, 0.8]]),
                entry("b.pdf", 10, &[[0.0, 1.0]]),
            ]),
        );

        let hits = generation.search(&[1.0, 0.0], 50);

        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        assert_eq!(hits[0].chunk.text, "a.pdf #0");
        assert_eq!(hits[2].document.id, "b.pdf");
        assert!(generation.search(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn ties_prefer_recent_documents_then_id() {
        let generation = IndexGeneration::new(
            1,
            BTreeMap::from([
                entry("old.pdf", 100, &[[1.0, 0.0]]),
                entry("new.pdf", 200, &[[1.0, 0.0]]),
                entry("also-new.pdf", 200, &[[1.0, 0.0]]),
            ]),
        );

        let order: Vec<&str> = generation
            .search(&[1.0, 0.0], 3)
            .iter()
            .map(|hit| hit.document.id.as_str())
            .collect();

        assert_eq!(order, vec!["also-new.pdf", "new.pdf", "old.pdf"]);
    }

    #[test]
    fn empty_generation_returns_no_hits() {
        let generation = IndexGeneration::new(1, BTreeMap::new());
        assert!(generation.search(&[1.0], 4).is_empty());
        assert_eq!(generation.chunk_count(), 0);
    }
}
