//! Overlapping, token-bounded chunking of extracted text.
//!
//! Highlights:
//!
//! - Per-kind budgets: spreadsheets use a smaller budget than paginated documents because their
//!   rendered rows are dense.
//! - Overlap: a fraction of the budget is repeated from the tail of the previous chunk so spans
//!   around boundaries stay retrievable.
//! - Token counting: `whitespace` counts words; any other tokenizer name is resolved through
//!   `tiktoken-rs` (model first, then encoding name) with a whitespace fallback.
//!
//! Chunking is a pure function of the text and configuration, so identical input always yields
//! identical chunks.

use super::fingerprint::sha256_hex;
use super::types::DocumentKind;
use crate::config::ChunkingConfig;
use crate::index::Chunk;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};
use uuid::Uuid;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Namespace for deterministic chunk identifiers.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x5d1f_3b7e_9a40_4c6e_8e21_7b0c_6a93_f2d4);

/// Errors produced while turning text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Configuration asked for an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Token-bounded chunker configured per document kind.
#[derive(Clone)]
pub struct TextChunker {
    paginated_chunk_size: usize,
    tabular_chunk_size: usize,
    overlap_ratio: f32,
    counter: TokenCounter,
}

impl std::fmt::Debug for TextChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextChunker")
            .field("paginated_chunk_size", &self.paginated_chunk_size)
            .field("tabular_chunk_size", &self.tabular_chunk_size)
            .field("overlap_ratio", &self.overlap_ratio)
            .finish_non_exhaustive()
    }
}

impl TextChunker {
    /// Build a chunker from configuration.
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkingError> {
        if config.paginated_chunk_size == 0 || config.tabular_chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            paginated_chunk_size: config.paginated_chunk_size,
            tabular_chunk_size: config.tabular_chunk_size,
            overlap_ratio: config.overlap_ratio.clamp(0.0, 0.5),
            counter: build_token_counter(&config.tokenizer),
        })
    }

    /// Token budget for `kind`.
    pub fn chunk_size(&self, kind: DocumentKind) -> usize {
        match kind {
            DocumentKind::Paginated => self.paginated_chunk_size,
            DocumentKind::Tabular => self.tabular_chunk_size,
        }
    }

    /// Overlap in tokens for `kind`.
    pub fn overlap(&self, kind: DocumentKind) -> usize {
        (self.chunk_size(kind) as f32 * self.overlap_ratio).round() as usize
    }

    /// Split `text` into overlapping passages; empty when the text is blank.
    pub fn split(&self, kind: DocumentKind, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        chunk_text_with_counter(
            text,
            self.chunk_size(kind),
            self.overlap(kind),
            self.counter.clone(),
        )
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
    }

    /// Pair passages with their embeddings, in order, as [`Chunk`]s.
    pub fn build_chunks(
        document_id: &str,
        passages: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Vec<Chunk> {
        passages
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| {
                let hash = sha256_hex(text.as_bytes());
                Chunk {
                    id: chunk_id(document_id, ordinal, &hash),
                    document_id: document_id.to_string(),
                    ordinal,
                    text,
                    hash,
                    embedding,
                }
            })
            .collect()
    }
}

/// Deterministic chunk identifier.
pub fn chunk_id(document_id: &str, ordinal: usize, hash: &str) -> Uuid {
    Uuid::new_v5(
        &CHUNK_NAMESPACE,
        format!("{document_id}\u{1f}{ordinal}\u{1f}{hash}").as_bytes(),
    )
}

/// Build a token counter for a tokenizer name.
///
/// `whitespace` (or an empty name) counts words. Other names go through `tiktoken`; unknown
/// names fall back to whitespace counting with a warning so ingestion keeps flowing.
fn build_token_counter(tokenizer: &str) -> TokenCounter {
    let name = tokenizer.trim();
    if name.is_empty() || name.eq_ignore_ascii_case("whitespace") {
        return default_token_counter();
    }
    match resolve_encoding(name) {
        Some(Ok(encoding)) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Some(Err(error)) => {
            tracing::warn!(tokenizer = name, error = %error, "Tokenizer failed to load; using whitespace counter");
            default_token_counter()
        }
        None => {
            tracing::warn!(tokenizer = name, "Unknown tokenizer; using whitespace counter");
            default_token_counter()
        }
    }
}

fn resolve_encoding(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match get_bpe_from_model(name) {
        Ok(encoding) => Some(Ok(encoding)),
        Err(model_err) => {
            tracing::debug!(
                tokenizer = name,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            encoding_from_name(name)
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

fn default_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size - overlap,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &token_counter)
}

/// Prefix each chunk with a token-limited tail of its predecessor. Base chunks are cut at
/// `chunk_size - overlap`, so the prefix fits; a tokenizer that merges across the seam may
/// still push a chunk over budget, in which case its end is trimmed and the prefix is kept.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    if overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;
    for current in chunks {
        let merged = match &previous {
            Some(prev) => {
                let tail = longest_suffix_within(prev, overlap, token_counter);
                let mut combined = String::with_capacity(tail.len() + current.len() + 1);
                if !tail.is_empty() {
                    combined.push_str(tail);
                    if !tail.ends_with(char::is_whitespace)
                        && !current.starts_with(char::is_whitespace)
                    {
                        combined.push(' ');
                    }
                }
                combined.push_str(&current);
                longest_prefix_within(&combined, chunk_size, token_counter).to_string()
            }
            None => current.clone(),
        };
        overlapped.push(merged);
        previous = Some(current);
    }
    overlapped
}

/// Longest suffix of `text` (starting at a char boundary, leading whitespace trimmed) that fits
/// within `token_limit`.
fn longest_suffix_within<'a>(
    text: &'a str,
    token_limit: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    if token_limit == 0 {
        return "";
    }
    let trimmed = text.trim_start();
    if token_counter.as_ref()(trimmed) <= token_limit {
        return trimmed;
    }
    // Suffixes shrink as the start moves right; find the leftmost start that fits.
    let starts: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
    let (mut low, mut high) = (1, starts.len());
    while low < high {
        let mid = low + (high - low) / 2;
        if token_counter.as_ref()(text[starts[mid]..].trim_start()) <= token_limit {
            high = mid;
        } else {
            low = mid + 1;
        }
    }
    starts
        .get(low)
        .map_or("", |&offset| text[offset..].trim_start())
}

/// Longest prefix of `text` (ending at a char boundary, trailing whitespace trimmed) that fits
/// within `token_limit`.
fn longest_prefix_within<'a>(
    text: &'a str,
    token_limit: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    let trimmed = text.trim_end();
    if token_counter.as_ref()(trimmed) <= token_limit {
        return trimmed;
    }
    let ends: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .skip(1)
        .collect();
    let (mut low, mut high) = (0, ends.len());
    while low < high {
        let mid = low + (high - low).div_ceil(2);
        if token_counter.as_ref()(text[..ends[mid - 1]].trim_end()) <= token_limit {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    if low == 0 {
        ""
    } else {
        text[..ends[low - 1]].trim_end()
    }
}
