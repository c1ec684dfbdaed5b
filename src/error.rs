//! Error types for the logi-extract library.
//!
//! Four error types reflect four distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot start at all (no
//!   credential, provider not configured, unreadable source directory,
//!   unsupported output format). Returned before any document is touched.
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (unreadable
//!   file, model call failed after retries, response was not the expected
//!   JSON). The batch records it and moves on; the document stays pending and
//!   is retried on the next run.
//!
//! * [`ModelError`] — a failure reported by the document-understanding model
//!   collaborator. [`ModelError::is_transient`] decides whether the retry
//!   decorator tries again.
//!
//! * [`TableError`] — the output spreadsheet could not be read or written.
//!   Reads degrade to an empty table; writes are retried on the next commit.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the logi-extract library.
///
/// Per-document failures use [`DocumentError`] and are collected in
/// [`crate::batch::BatchSummary`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source directory does not exist or cannot be listed.
    #[error("Cannot read source directory '{path}': {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Model errors ──────────────────────────────────────────────────────
    /// No credential or provider could be resolved for the model.
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The output table path has an extension we cannot write.
    #[error(transparent)]
    Table(#[from] TableError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
///
/// A document that fails this way contributes no rows, so it is not part of
/// the processed set and is attempted again on the next run.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum DocumentError {
    /// The file could not be read from disk.
    #[error("{document}: read failed: {detail}")]
    ReadFailed { document: String, detail: String },

    /// The file was read but does not start with `%PDF`.
    #[error("{document}: not a PDF (first bytes {magic:?})")]
    NotAPdf { document: String, magic: Vec<u8> },

    /// The model call failed (after the collaborator's own retries).
    #[error("{document}: model call failed: {detail}")]
    ModelFailed { document: String, detail: String },

    /// The model answered, but not with a JSON object matching the schema.
    #[error("{document}: malformed model response: {detail}")]
    MalformedResponse { document: String, detail: String },
}

impl DocumentError {
    /// Identifier of the document this error belongs to.
    pub fn document(&self) -> &str {
        match self {
            DocumentError::ReadFailed { document, .. }
            | DocumentError::NotAPdf { document, .. }
            | DocumentError::ModelFailed { document, .. }
            | DocumentError::MalformedResponse { document, .. } => document,
        }
    }
}

/// Failure reported by a [`crate::pipeline::model::DocumentModel`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// The API answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection-level failure (DNS, TLS, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The API answered successfully but without any text.
    #[error("model returned no content")]
    EmptyResponse,

    /// The model refused to answer (safety filter, recitation, …).
    #[error("response blocked: {reason}")]
    Blocked { reason: String },

    /// Error surfaced by an edgequake-llm provider.
    #[error("provider error: {0}")]
    Provider(String),
}

impl ModelError {
    /// Whether retrying the same request may succeed.
    ///
    /// Mirrors the usual transient set for Google APIs: 408, 429 and 5xx,
    /// plus timeouts and connection errors. Provider errors are opaque
    /// strings, so they are retried like any other network failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Http { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            ModelError::Transport(_) | ModelError::Timeout { .. } | ModelError::Provider(_) => {
                true
            }
            ModelError::EmptyResponse | ModelError::Blocked { .. } => false,
        }
    }
}

/// Output table read/write failures.
#[derive(Debug, Error)]
pub enum TableError {
    /// The file extension is neither `.xlsx` nor `.csv`.
    #[error("Unsupported table format for '{path}': expected .xlsx or .csv")]
    UnsupportedFormat { path: PathBuf },

    /// The file exists but could not be parsed as a table.
    #[error("Table '{path}' is unreadable: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// Serialising the table to bytes failed.
    #[error("Failed to encode table: {0}")]
    Encode(String),

    /// Reading the file failed at the I/O level.
    #[error("Failed to read table '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating, writing or renaming the file failed.
    #[error("Failed to write table '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
