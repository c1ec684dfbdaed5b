//! # logi-extract
//!
//! Extract structured fields from logistics PDFs (freight invoices, bills of
//! lading) with a document-understanding model and accumulate them into one
//! spreadsheet, resumably.
//!
//! ## Pipeline Overview
//!
//! ```text
//! directory of PDFs
//!  │
//!  ├─ 1. Discover  *.pdf files, sorted by name
//!  ├─ 2. Resume    load the existing table, skip documents already in it
//!  ├─ 3. Extract   PDF + instruction + JSON schema → model → Record
//!  ├─ 4. Normalise Record → one row per container (or per invoice)
//!  └─ 5. Commit    rewrite the whole .xlsx/.csv after every document
//! ```
//!
//! Interrupting a run loses at most the document in flight: the next run
//! reloads the table and continues with what is missing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logi_extract::{run_batch, ExtractionConfig, SchemaVariant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Gemini key read from GOOGLE_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::builder()
//!         .variant(SchemaVariant::ContainerLines)
//!         .build()?;
//!     let summary = run_batch("invoices/", "Results.xlsx", &config).await?;
//!     eprintln!("{} rows added, {} documents failed",
//!         summary.rows_added, summary.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `logi-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | Enables [`service`], the HTTP upload service (axum + tower-http) |
//!
//! ## Schema Variants
//!
//! | Variant | Rows | Identifier |
//! |---------|------|------------|
//! | `container-lines` (default) | one per container | `file_name` |
//! | `invoice-summary` | one per invoice | `filename` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod schema;
#[cfg(feature = "server")]
pub mod service;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{run_batch, BatchDriver, BatchSummary};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{DocumentError, ModelError, PipelineError, TableError};
pub use pipeline::extract::ExtractionClient;
pub use pipeline::model::{
    DocumentModel, GeminiModel, InferenceRequest, ModelResponse, ProviderModel,
};
pub use pipeline::normalize::normalize;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{Cell, Field, Record};
pub use schema::{IdentityPolicy, SchemaVariant};
pub use table::sink::TableSink;
pub use table::{OutputTable, Row};
