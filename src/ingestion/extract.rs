//! Text extraction for paginated documents and spreadsheets.
//!
//! Extractors are selected by the [`DocumentKind`] tag attached to each watched directory and
//! run on the blocking pool. The paginated variant keeps page order and marks page boundaries;
//! the tabular variant renders every sheet row by row and records a [`SheetPreview`].

use super::types::{DocumentKind, SheetPreview};
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::sync::Arc;
use thiserror::Error;
use zip::ZipArchive;

/// Maximum sheets read from one workbook.
const MAX_SHEETS: usize = 100;
/// Maximum cells read from one sheet.
const MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes read from a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Column count of an XLSX sheet (`A` through `XFD`).
const MAX_COLUMNS: u32 = 16_384;

/// Text produced by an extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Plain text handed to the chunker.
    pub text: String,
    /// Sheet previews (tabular documents only).
    pub sheets: Vec<SheetPreview>,
}

/// Extraction failure for a single file.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The PDF could not be parsed.
    #[error("PDF extraction failed: {0}")]
    Paginated(String),
    /// The workbook could not be parsed.
    #[error("spreadsheet extraction failed: {0}")]
    Tabular(String),
}

/// Converts raw file bytes into plain text.
pub trait Extractor: Send + Sync {
    /// Document kind handled by this extractor.
    fn kind(&self) -> DocumentKind;

    /// Extract text from file contents.
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError>;
}

/// One extractor per document kind.
#[derive(Clone)]
pub struct ExtractorSet {
    paginated: Arc<dyn Extractor>,
    tabular: Arc<dyn Extractor>,
}

impl ExtractorSet {
    /// Combine custom extractors.
    pub fn new(paginated: Arc<dyn Extractor>, tabular: Arc<dyn Extractor>) -> Self {
        Self { paginated, tabular }
    }

    /// Extractor responsible for `kind`.
    pub fn for_kind(&self, kind: DocumentKind) -> Arc<dyn Extractor> {
        match kind {
            DocumentKind::Paginated => self.paginated.clone(),
            DocumentKind::Tabular => self.tabular.clone(),
        }
    }
}

impl Default for ExtractorSet {
    fn default() -> Self {
        Self::new(Arc::new(PaginatedExtractor), Arc::new(TabularExtractor))
    }
}

/// PDF extractor yielding page-ordered text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PaginatedExtractor;

impl Extractor for PaginatedExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Paginated
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|error| ExtractionError::Paginated(error.to_string()))?;
        Ok(Extraction {
            text: render_pages(&pages),
            sheets: Vec::new(),
        })
    }
}

/// Join pages with `--- Page N ---` markers, skipping blank pages.
pub fn render_pages(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(idx, page)| format!("--- Page {} ---\n{}", idx + 1, page.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// XLSX extractor rendering each sheet as labelled rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct TabularExtractor;

impl Extractor for TabularExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Tabular
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        let sheets = read_workbook(bytes)?;
        let mut sections = Vec::with_capacity(sheets.len());
        let mut previews = Vec::with_capacity(sheets.len());
        for sheet in sheets {
            let (text, preview) = render_sheet(&sheet.name, &sheet.rows);
            sections.push(text);
            previews.push(preview);
        }
        Ok(Extraction {
            text: sections.join("\n\n"),
            sheets: previews,
        })
    }
}

type SheetRows = BTreeMap<u32, BTreeMap<u32, String>>;

struct RawSheet {
    name: String,
    rows: SheetRows,
}

fn tabular_error(error: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Tabular(error.to_string())
}

fn render_sheet(name: &str, rows: &SheetRows) -> (String, SheetPreview) {
    let mut populated = rows.values().filter(|cells| !cells.is_empty());
    let header = populated.next();
    let data: Vec<&BTreeMap<u32, String>> = populated.collect();

    let width = rows
        .values()
        .filter_map(|cells| cells.keys().next_back())
        .max()
        .map(|last| last + 1)
        .unwrap_or(0);
    let columns: Vec<String> = (0..width)
        .map(|col| {
            header
                .and_then(|cells| cells.get(&col))
                .cloned()
                .unwrap_or_else(|| format!("Column{}", col + 1))
        })
        .collect();

    let mut text = format!(
        "=== SHEET: {name} ===\nColumns: {}\nRow count: {}",
        columns.join(", "),
        data.len()
    );
    let mut non_empty_cells = 0;
    for (idx, cells) in data.iter().enumerate() {
        let rendered: Vec<String> = cells
            .iter()
            .map(|(col, value)| format!("{}: {value}", columns[*col as usize]))
            .collect();
        non_empty_cells += rendered.len();
        text.push_str(&format!("\nRow {}: {}", idx + 1, rendered.join(", ")));
    }

    let preview = SheetPreview {
        name: name.to_string(),
        columns,
        rows: data.len(),
        non_empty_cells,
    };
    (text, preview)
}

fn read_workbook(bytes: &[u8]) -> Result<Vec<RawSheet>, ExtractionError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(tabular_error)?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for (name, entry) in locate_sheets(&mut archive)?.into_iter().take(MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &entry)?;
        let rows = parse_sheet_rows(&xml, &shared_strings)?;
        sheets.push(RawSheet { name, rows });
    }
    Ok(sheets)
}

fn read_zip_entry_bounded(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive.by_name(name).map_err(tabular_error)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(tabular_error)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::Tabular(format!(
            "archive entry {name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

fn attribute(element: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == local)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

/// Sheet names paired with their archive entries, in workbook order.
fn locate_sheets(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
) -> Result<Vec<(String, String)>, ExtractionError> {
    let has_workbook = archive.index_for_name("xl/workbook.xml").is_some();
    let has_rels = archive
        .index_for_name("xl/_rels/workbook.xml.rels")
        .is_some();

    if has_workbook && has_rels {
        let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml")?;
        let rels = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels")?;
        let targets = parse_relationships(&rels)?;
        let located: Vec<(String, String)> = parse_sheet_declarations(&workbook)?
            .into_iter()
            .filter_map(|(name, rel_id)| {
                let target = targets.get(&rel_id)?;
                let entry = match target.strip_prefix('/') {
                    Some(absolute) => absolute.to_string(),
                    None => format!("xl/{target}"),
                };
                archive.index_for_name(&entry).map(|_| (name, entry))
            })
            .collect();
        if !located.is_empty() {
            return Ok(located);
        }
    }

    let mut entries: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/sheet") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    entries.sort_by_key(|name| sheet_number(name));
    Ok(entries
        .into_iter()
        .map(|entry| (format!("Sheet{}", sheet_number(&entry)), entry))
        .collect())
}

fn sheet_number(entry: &str) -> u32 {
    entry
        .trim_start_matches("xl/worksheets/sheet")
        .trim_end_matches(".xml")
        .parse()
        .unwrap_or(u32::MAX)
}

fn parse_sheet_declarations(xml: &[u8]) -> Result<Vec<(String, String)>, ExtractionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(rel_id)) = (attribute(&e, b"name"), attribute(&e, b"id")) {
                    sheets.push((name, rel_id));
                }
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(tabular_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ExtractionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut targets = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id"), attribute(&e, b"Target"))
                {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(tabular_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = current.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(text)) if in_text => {
                if let Some(value) = current.as_mut() {
                    value.push_str(&text.unescape().map_err(tabular_error)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(tabular_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Split an A1-style reference into zero-based column and one-based row.
fn parse_cell_reference(reference: &str) -> Option<(u32, Option<u32>)> {
    let letters: String = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let column = letters
        .chars()
        .map(|c| u32::from(c.to_ascii_uppercase()) - u32::from('A') + 1)
        .fold(0_u32, |acc, digit| acc.saturating_mul(26).saturating_add(digit))
        - 1;
    let row = reference[letters.len()..].parse().ok();
    Some((column, row))
}

fn checked_column(column: u32) -> Result<u32, ExtractionError> {
    if column >= MAX_COLUMNS {
        return Err(ExtractionError::Tabular(format!(
            "cell column {} is beyond the last sheet column XFD",
            u64::from(column) + 1
        )));
    }
    Ok(column)
}

#[derive(Default)]
struct PendingCell {
    row: u32,
    column: u32,
    cell_type: Option<String>,
    value: String,
}

fn parse_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<SheetRows, ExtractionError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut rows = SheetRows::new();
    let mut current_row = 0_u32;
    let mut next_column = 0_u32;
    let mut pending: Option<PendingCell> = None;
    let mut capturing = false;
    let mut cell_count = 0_usize;

    loop {
        if cell_count >= MAX_CELLS_PER_SHEET {
            tracing::warn!(limit = MAX_CELLS_PER_SHEET, "Sheet truncated at cell limit");
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = attribute(&e, b"r")
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(current_row + 1);
                    next_column = 0;
                }
                b"c" => {
                    let (column, row) = attribute(&e, b"r")
                        .and_then(|reference| parse_cell_reference(&reference))
                        .unwrap_or((next_column, None));
                    pending = Some(PendingCell {
                        row: row.unwrap_or(current_row),
                        column: checked_column(column)?,
                        cell_type: attribute(&e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => capturing = pending.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = attribute(&e, b"r")
                        .and_then(|value| value.parse().ok())
                        .unwrap_or(current_row + 1);
                    next_column = 0;
                }
                b"c" => {
                    let column = attribute(&e, b"r")
                        .and_then(|reference| parse_cell_reference(&reference))
                        .map_or(next_column, |(column, _)| column);
                    next_column = checked_column(column)? + 1;
                }
                _ => {}
            },
            Ok(Event::Text(text)) if capturing => {
                if let Some(cell) = pending.as_mut() {
                    cell.value.push_str(&text.unescape().map_err(tabular_error)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capturing = false,
                b"c" => {
                    if let Some(cell) = pending.take() {
                        next_column = cell.column + 1;
                        if let Some(value) = resolve_cell(&cell, shared_strings) {
                            rows.entry(cell.row).or_default().insert(cell.column, value);
                            cell_count += 1;
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(tabular_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn resolve_cell(cell: &PendingCell, shared_strings: &[String]) -> Option<String> {
    let raw = cell.value.trim();
    if raw.is_empty() {
        return None;
    }
    let value = match cell.cell_type.as_deref() {
        Some("s") => shared_strings.get(raw.parse::<usize>().ok()?)?.clone(),
        Some("b") => if raw == "1" { "TRUE" } else { "FALSE" }.to_string(),
        _ => raw.to_string(),
    };
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}
