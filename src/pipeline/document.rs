//! Document discovery and loading.
//!
//! A document is identified by its file name: that string is what lands in
//! the identifier column and what resume compares against. Discovery is
//! therefore name-based and sorted, so two runs over the same directory see
//! the same order. We validate the PDF magic bytes (`%PDF`) before a document
//! reaches the model so a stray `.pdf`-named text file fails fast and cheaply
//! instead of burning an API call.

use crate::error::{DocumentError, PipelineError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A document found on disk but not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// File name, used as the document identifier.
    pub id: String,
    pub path: PathBuf,
}

/// A document loaded into memory.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub bytes: Vec<u8>,
}

impl Document {
    /// Build a document from bytes that are already in memory (uploads).
    ///
    /// Validates the PDF magic bytes.
    pub fn from_bytes(id: impl Into<String>, bytes: Vec<u8>) -> Result<Self, DocumentError> {
        let id = id.into();
        check_magic(&id, &bytes)?;
        Ok(Self { id, bytes })
    }

    pub fn mime_type(&self) -> &'static str {
        "application/pdf"
    }
}

/// Whether a file name has a `.pdf` extension (any case).
pub fn is_pdf_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// List every `*.pdf` file directly inside `dir`, sorted by file name.
///
/// Sub-directories are not descended into. Entries whose names are not valid
/// UTF-8 are skipped: they could not be written to the identifier column.
pub fn discover_documents(dir: &Path) -> Result<Vec<DocumentRef>, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::SourceUnreadable {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut docs: Vec<DocumentRef> = entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            is_pdf_name(&name).then(|| DocumentRef {
                id: name,
                path: entry.path(),
            })
        })
        .collect();

    docs.sort_by(|a, b| a.id.cmp(&b.id));
    debug!("Discovered {} PDF files in {}", docs.len(), dir.display());
    Ok(docs)
}

/// Read a discovered document and validate that it is a PDF.
pub async fn read_document(doc: &DocumentRef) -> Result<Document, DocumentError> {
    let bytes = tokio::fs::read(&doc.path)
        .await
        .map_err(|e| DocumentError::ReadFailed {
            document: doc.id.clone(),
            detail: e.to_string(),
        })?;
    check_magic(&doc.id, &bytes)?;
    debug!("Read {} ({} bytes)", doc.id, bytes.len());
    Ok(Document {
        id: doc.id.clone(),
        bytes,
    })
}

fn check_magic(id: &str, bytes: &[u8]) -> Result<(), DocumentError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(DocumentError::NotAPdf {
            document: id.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Reduce a client-supplied file name to a safe, flat identifier.
///
/// Drops any directory part, replaces characters outside `[A-Za-z0-9._-]`
/// with `_`, and strips leading dots. Returns `None` when nothing usable is
/// left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    (!cleaned.is_empty() && cleaned.chars().any(|c| c.is_ascii_alphanumeric())).then_some(cleaned)
}
