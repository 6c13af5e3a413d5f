#![allow(dead_code)]

use async_trait::async_trait;
use carelens::{
    embedding::{EmbeddingClient, HashEmbeddingClient},
    generation::{GenerationClient, GenerationRequest},
    index::VectorIndex,
    ingestion::{
        DocumentKind, Extraction, ExtractionError, Extractor, ExtractorSet, IngestionCoordinator,
        TabularExtractor, TextChunker, WatchedDirectory,
    },
    config::ChunkingConfig,
    resilience::CapabilityError,
};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const DIMENSION: usize = 256;

/// Hash embedder that counts requests and embedded texts.
#[derive(Default)]
pub struct CountingEmbedder {
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
    gate: Option<Gate>,
}

/// Blocks embedding requests until released.
pub struct Gate {
    pub entered: Notify,
    pub release: Semaphore,
}

impl CountingEmbedder {
    pub fn gated() -> Self {
        Self {
            gate: Some(Gate {
                entered: Notify::new(),
                release: Semaphore::new(0),
            }),
            ..Self::default()
        }
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("gated embedder")
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for CountingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, CapabilityError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release
                .acquire()
                .await
                .map_err(|_| CapabilityError::Unavailable("gate closed".into()))?
                .forget();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        let encoder = HashEmbeddingClient::new(DIMENSION);
        Ok(texts.iter().map(|text| encoder.encode(text)).collect())
    }

    fn model(&self) -> &str {
        "counting-hash"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// Paginated stand-in that reads UTF-8 text; files starting with `CORRUPT` fail.
#[derive(Default)]
pub struct TextExtractor {
    pub calls: AtomicUsize,
}

impl TextExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for TextExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Paginated
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(bytes);
        if text.starts_with("CORRUPT") {
            return Err(ExtractionError::Paginated("no pages found".into()));
        }
        Ok(Extraction {
            text: format!("--- Page 1 ---\n{text}"),
            sheets: Vec::new(),
        })
    }
}

/// Generator returning a fixed reply and recording prompts.
pub struct ScriptedGenerator {
    reply: String,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.prompt);
        Ok(self.reply.clone())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Temporary watched directories plus a coordinator wired to counting fakes.
pub struct Workspace {
    pub root: TempDir,
    pub embedder: Arc<CountingEmbedder>,
    pub extractor: Arc<TextExtractor>,
    pub index: Arc<VectorIndex>,
    pub coordinator: Arc<IngestionCoordinator>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_embedder(CountingEmbedder::default())
    }

    pub fn with_embedder(embedder: CountingEmbedder) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let embedder = Arc::new(embedder);
        let extractor = Arc::new(TextExtractor::default());
        let index = Arc::new(VectorIndex::new());
        let coordinator = Arc::new(build_coordinator(
            root.path(),
            embedder.clone(),
            extractor.clone(),
            index.clone(),
        ));
        Self {
            root,
            embedder,
            extractor,
            index,
            coordinator,
        }
    }

    /// Coordinator sharing the same directories, as after a process restart.
    pub fn restarted(&self) -> (IngestionCoordinator, Arc<CountingEmbedder>, Arc<VectorIndex>) {
        let embedder = Arc::new(CountingEmbedder::default());
        let index = Arc::new(VectorIndex::new());
        let coordinator = build_coordinator(
            self.root.path(),
            embedder.clone(),
            Arc::new(TextExtractor::default()),
            index.clone(),
        );
        coordinator.restore();
        (coordinator, embedder, index)
    }

    pub fn paginated_dir(&self) -> PathBuf {
        self.root.path().join("pdfs")
    }

    pub fn tabular_dir(&self) -> PathBuf {
        self.root.path().join("spreadsheets")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.path().join("cache")
    }

    pub fn write_paginated(&self, name: &str, text: &str) -> PathBuf {
        let dir = self.paginated_dir();
        std::fs::create_dir_all(&dir).expect("create paginated dir");
        let path = dir.join(name);
        std::fs::write(&path, text).expect("write paginated file");
        path
    }

    pub fn write_tabular(&self, name: &str, rows: &[&[&str]]) -> PathBuf {
        let dir = self.tabular_dir();
        std::fs::create_dir_all(&dir).expect("create tabular dir");
        let path = dir.join(name);
        std::fs::write(&path, workbook("Sheet1", rows)).expect("write workbook");
        path
    }
}

pub fn directories(root: &Path) -> Vec<WatchedDirectory> {
    vec![
        WatchedDirectory {
            kind: DocumentKind::Paginated,
            path: root.join("pdfs"),
        },
        WatchedDirectory {
            kind: DocumentKind::Tabular,
            path: root.join("spreadsheets"),
        },
    ]
}

fn build_coordinator(
    root: &Path,
    embedder: Arc<CountingEmbedder>,
    extractor: Arc<TextExtractor>,
    index: Arc<VectorIndex>,
) -> IngestionCoordinator {
    let chunker = TextChunker::from_config(&ChunkingConfig {
        paginated_chunk_size: 32,
        tabular_chunk_size: 32,
        ..ChunkingConfig::default()
    })
    .expect("chunker");
    IngestionCoordinator::new(
        directories(root),
        root.join("cache"),
        chunker,
        embedder,
        index,
    )
    .with_extractors(ExtractorSet::new(extractor, Arc::new(TabularExtractor)))
    .with_batch_size(4)
}

/// Build a single-sheet XLSX workbook with inline string cells.
pub fn workbook(sheet: &str, rows: &[&[&str]]) -> Vec<u8> {
    const WORKBOOK_RELS: &str = r#"<?xml version="1.0"?><Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#;

    let workbook_xml = format!(
        r#"<?xml version="1.0"?><workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{sheet}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
    );
    let mut sheet_xml = String::from(r#"<?xml version="1.0"?><worksheet><sheetData>"#);
    for (row_idx, row) in rows.iter().enumerate() {
        sheet_xml.push_str(&format!(r#"<row r="{}">"#, row_idx + 1));
        for (col_idx, value) in row.iter().enumerate() {
            let column = char::from(b'A' + col_idx as u8);
            sheet_xml.push_str(&format!(
                r#"<c r="{column}{}" t="inlineStr"><is><t>{value}</t></is></c>"#,
                row_idx + 1
            ));
        }
        sheet_xml.push_str("</row>");
    }
    sheet_xml.push_str("</sheetData></worksheet>");

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        for (name, body) in [
            ("xl/workbook.xml", workbook_xml.as_str()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/worksheets/sheet1.xml", sheet_xml.as_str()),
        ] {
            zip.start_file(name, zip::write::SimpleFileOptions::default())
                .expect("start entry");
            zip.write_all(body.as_bytes()).expect("write entry");
        }
        zip.finish().expect("finish zip");
    }
    buf
}
