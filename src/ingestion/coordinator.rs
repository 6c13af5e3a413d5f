//! Ingestion coordinator orchestrating change detection through index publication.

use super::chunking::TextChunker;
use super::extract::ExtractorSet;
use super::fingerprint::{FileStamp, current_timestamp_rfc3339};
use super::manifest::CacheManifest;
use super::types::{
    DocumentError, DocumentKind, IngestionFailure, IngestionReport, SourceDocument, SyncError,
    SyncScope, WatchedDirectory,
};
use crate::embedding::EmbeddingClient;
use crate::index::{DocumentEntry, IndexGeneration, VectorIndex, snapshot};
use crate::resilience::CapabilityError;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use walkdir::WalkDir;

/// Embedding requests allowed in flight for one document.
const EMBED_CONCURRENCY: usize = 2;
const DEFAULT_BATCH_SIZE: usize = 16;

/// Keeps the vector index and the cache manifest in step with the watched directories.
///
/// Only one `sync` runs at a time; a second caller gets [`SyncError::InProgress`]. The slow
/// extraction and embedding work happens before the index pointer swap, so searches continue
/// against the previous generation until the new one is published.
pub struct IngestionCoordinator {
    directories: Vec<WatchedDirectory>,
    cache_dir: PathBuf,
    extractors: ExtractorSet,
    chunker: TextChunker,
    embedder: Arc<dyn EmbeddingClient>,
    batch_size: usize,
    index: Arc<VectorIndex>,
    manifest: RwLock<CacheManifest>,
    sync_gate: Mutex<()>,
}

enum FileOutcome {
    Unchanged,
    Indexed {
        entry: DocumentEntry,
        embedding_calls: usize,
    },
}

impl IngestionCoordinator {
    /// Create a coordinator with the default extractors and an empty manifest.
    pub fn new(
        directories: Vec<WatchedDirectory>,
        cache_dir: PathBuf,
        chunker: TextChunker,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self {
            directories,
            cache_dir,
            extractors: ExtractorSet::default(),
            chunker,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            index,
            manifest: RwLock::new(CacheManifest::new()),
            sync_gate: Mutex::new(()),
        }
    }

    /// Replace the extractors.
    pub fn with_extractors(mut self, extractors: ExtractorSet) -> Self {
        self.extractors = extractors;
        self
    }

    /// Set the number of passages per embedding request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Load the persisted manifest and index snapshot from the cache directory.
    ///
    /// Unreadable files are logged and ignored; the next `sync` rebuilds what is missing.
    pub fn restore(&self) {
        let manifest_path = CacheManifest::path_in(&self.cache_dir);
        match CacheManifest::load(&manifest_path) {
            Ok(manifest) => {
                tracing::info!(documents = manifest.len(), "Loaded cache manifest");
                *self.manifest.write().unwrap_or_else(PoisonError::into_inner) = manifest;
            }
            Err(error) => tracing::warn!(error = %error, "Ignoring unreadable cache manifest"),
        }

        match snapshot::load(&snapshot::snapshot_path(&self.cache_dir)) {
            Ok(Some(generation)) => {
                self.index.publish(generation);
            }
            Ok(None) => tracing::debug!("No index snapshot found"),
            Err(error) => tracing::warn!(error = %error, "Ignoring unreadable index snapshot"),
        }
    }

    /// Directories scanned by [`Self::sync_all`].
    pub fn directories(&self) -> &[WatchedDirectory] {
        &self.directories
    }

    /// Directory configured for `kind`.
    pub fn directory_for(&self, kind: DocumentKind) -> Option<&Path> {
        self.directories
            .iter()
            .find(|dir| dir.kind == kind)
            .map(|dir| dir.path.as_path())
    }

    /// Index the coordinator publishes into.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Copy of the current manifest.
    pub fn manifest(&self) -> CacheManifest {
        self.manifest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a `sync` is currently running.
    pub fn is_syncing(&self) -> bool {
        self.sync_gate.try_lock().is_err()
    }

    /// Synchronize every configured directory.
    pub async fn sync_all(&self) -> Result<IngestionReport, SyncError> {
        self.sync(SyncScope::Directories(self.directories.clone()))
            .await
    }

    /// Bring the index and manifest in line with the files in `scope`.
    pub async fn sync(&self, scope: SyncScope) -> Result<IngestionReport, SyncError> {
        let _guard = self.sync_gate.try_lock().map_err(|_| SyncError::InProgress)?;
        let started = Instant::now();

        let previous = self.index.current();
        let mut manifest = self.manifest();
        let mut documents: BTreeMap<String, Arc<DocumentEntry>> = previous
            .as_ref()
            .map(|generation| generation.documents().clone())
            .unwrap_or_default();
        let mut report = IngestionReport::default();

        let candidates = self.discover(&scope, &mut report).await?;

        let known: BTreeSet<String> = manifest
            .documents()
            .map(|document| document.id.clone())
            .chain(documents.keys().cloned())
            .collect();
        for id in known {
            if in_scope(&scope, &id) && !candidates.contains_key(&id) {
                manifest.remove(&id);
                documents.remove(&id);
                tracing::info!(document = %id, "Purged deleted document");
                report.removed.push(id);
            }
        }

        for (id, (path, kind)) in &candidates {
            let outcome = self
                .ingest_file(id, path, *kind, &manifest, previous.as_deref())
                .await;
            match outcome {
                Ok(FileOutcome::Unchanged) => {
                    tracing::debug!(document = %id, "Cache hit; skipping");
                    report.unchanged += 1;
                }
                Ok(FileOutcome::Indexed {
                    entry,
                    embedding_calls,
                }) => {
                    report.chunks_embedded += entry.chunks.len();
                    report.embedding_calls += embedding_calls;
                    if manifest.get(id).is_some() {
                        report.updated.push(id.clone());
                    } else {
                        report.added.push(id.clone());
                    }
                    tracing::debug!(document = %id, chunks = entry.chunks.len(), "Document indexed");
                    manifest.upsert(entry.document.clone());
                    documents.insert(id.clone(), Arc::new(entry));
                }
                Err(error) => {
                    tracing::warn!(document = %id, error = %error, "Document ingestion failed");
                    report.failed.push(IngestionFailure {
                        document: id.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        let active = match previous {
            Some(previous) if report.changed() == 0 => previous,
            previous => {
                let next_id = previous.map(|generation| generation.id() + 1).unwrap_or(1);
                let published = self.index.publish(IndexGeneration::new(next_id, documents));
                *self.manifest.write().unwrap_or_else(PoisonError::into_inner) = manifest.clone();
                self.persist(manifest, Arc::clone(&published)).await?;
                published
            }
        };

        report.total_documents = active.document_count();
        report.total_chunks = active.chunk_count();
        report.generation = Some(active.id());
        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged,
            failed = report.failed.len(),
            chunks_embedded = report.chunks_embedded,
            generation = active.id(),
            duration_ms = report.duration_ms,
            "Sync completed"
        );
        Ok(report)
    }

    /// Write the manifest and the index snapshot on the blocking pool.
    async fn persist(
        &self,
        manifest: CacheManifest,
        generation: Arc<IndexGeneration>,
    ) -> Result<(), SyncError> {
        let cache_dir = self.cache_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SyncError> {
            manifest.save(&CacheManifest::path_in(&cache_dir))?;
            snapshot::save(&snapshot::snapshot_path(&cache_dir), &generation)?;
            Ok(())
        })
        .await
        .map_err(|error| SyncError::Worker(error.to_string()))?
    }

    /// Existing files in scope keyed by document id.
    async fn discover(
        &self,
        scope: &SyncScope,
        report: &mut IngestionReport,
    ) -> Result<BTreeMap<String, (PathBuf, DocumentKind)>, SyncError> {
        let mut found = BTreeMap::new();
        match scope {
            SyncScope::Directories(directories) => {
                for directory in directories {
                    tokio::fs::create_dir_all(&directory.path)
                        .await
                        .map_err(|source| SyncError::Scan {
                            path: directory.path.clone(),
                            source,
                        })?;
                    for entry in WalkDir::new(&directory.path).follow_links(false) {
                        let entry = match entry {
                            Ok(entry) => entry,
                            Err(error) => {
                                tracing::warn!(error = %error, "Skipping unreadable directory entry");
                                continue;
                            }
                        };
                        if !entry.file_type().is_file() {
                            continue;
                        }
                        let path = entry.into_path();
                        if DocumentKind::from_path(&path) == Some(directory.kind) {
                            found.insert(document_id(&path), (path, directory.kind));
                        } else {
                            tracing::trace!(path = %path.display(), "Ignoring unsupported file");
                        }
                    }
                }
            }
            SyncScope::Files(files) => {
                for path in files {
                    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                        continue;
                    }
                    match DocumentKind::from_path(path) {
                        Some(kind) => {
                            found.insert(document_id(path), (path.clone(), kind));
                        }
                        None => report.failed.push(IngestionFailure {
                            document: document_id(path),
                            reason: "unsupported file kind".into(),
                        }),
                    }
                }
            }
        }
        Ok(found)
    }

    async fn ingest_file(
        &self,
        id: &str,
        path: &Path,
        kind: DocumentKind,
        manifest: &CacheManifest,
        previous: Option<&IndexGeneration>,
    ) -> Result<FileOutcome, DocumentError> {
        let bytes = tokio::fs::read(path).await?;
        let metadata = tokio::fs::metadata(path).await?;
        let stamp = FileStamp::new(&bytes, &metadata);

        let fingerprint_matches = manifest
            .get(id)
            .is_some_and(|document| document.fingerprint == stamp.fingerprint);
        let indexed = previous.is_some_and(|generation| generation.document(id).is_some());
        if fingerprint_matches && indexed {
            return Ok(FileOutcome::Unchanged);
        }

        let extractor = self.extractors.for_kind(kind);
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|error| DocumentError::Worker(error.to_string()))??;

        let passages = self.chunker.split(kind, &extraction.text);
        let (embeddings, embedding_calls) = self.embed_passages(&passages).await?;

        let document = SourceDocument {
            id: id.to_string(),
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.to_string()),
            kind,
            fingerprint: stamp.fingerprint,
            size_bytes: stamp.size_bytes,
            modified_at: stamp.modified_at,
            processed_at: current_timestamp_rfc3339(),
            chunk_count: passages.len(),
            sheets: extraction.sheets,
        };
        let chunks = TextChunker::build_chunks(id, passages, embeddings);
        Ok(FileOutcome::Indexed {
            entry: DocumentEntry::new(document, chunks),
            embedding_calls,
        })
    }

    async fn embed_passages(
        &self,
        passages: &[String],
    ) -> Result<(Vec<Vec<f32>>, usize), CapabilityError> {
        let batches: Vec<Vec<String>> = passages
            .chunks(self.batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let calls = batches.len();
        let results: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| self.embedder.embed(batch))
            .buffered(EMBED_CONCURRENCY)
            .try_collect()
            .await?;
        let embeddings: Vec<Vec<f32>> = results.into_iter().flatten().collect();
        if embeddings.len() != passages.len() {
            return Err(CapabilityError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                passages.len(),
                embeddings.len()
            )));
        }
        Ok((embeddings, calls))
    }
}

fn document_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn in_scope(scope: &SyncScope, id: &str) -> bool {
    let path = Path::new(id);
    match scope {
        SyncScope::Directories(directories) => directories
            .iter()
            .any(|directory| path.starts_with(&directory.path)),
        SyncScope::Files(files) => files.iter().any(|file| file.as_path() == path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_membership_follows_directories_and_files() {
        let directories = SyncScope::Directories(vec![WatchedDirectory {
            kind: DocumentKind::Paginated,
            path: PathBuf::from("data/pdfs"),
        }]);
        assert!(in_scope(&directories, "data/pdfs/report.pdf"));
        assert!(in_scope(&directories, "data/pdfs/nested/report.pdf"));
        assert!(!in_scope(&directories, "data/pdfs-archive/report.pdf"));
        assert!(!in_scope(&SyncScope::Directories(Vec::new()), "data/pdfs/report.pdf"));

        let files = SyncScope::Files(vec![PathBuf::from("data/spreadsheets/stats.xlsx")]);
        assert!(in_scope(&files, "data/spreadsheets/stats.xlsx"));
        assert!(!in_scope(&files, "data/spreadsheets/other.xlsx"));
    }
}
