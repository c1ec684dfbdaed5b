//! Batch driver: a directory of PDFs → one resumable output table.
//!
//! ## Flow
//!
//! ```text
//! discover *.pdf ─► load existing table ─► resume (filter processed)
//!        │
//!        └─► for each pending document, in discovery order:
//!              read ─► extract ─► normalise ─► append ─► commit (full rewrite)
//!              (a failed document appends nothing but is still committed)
//!              sleep(delay) before the next one
//! ```
//!
//! Documents are processed strictly one at a time. A failed document is
//! recorded in the [`BatchSummary`] and stays pending for the next run; only
//! configuration problems (no credential, unreadable source directory,
//! unsupported output extension) abort the run, and they do so before the
//! first document is touched.

use crate::config::ExtractionConfig;
use crate::error::{DocumentError, PipelineError};
use crate::pipeline::document::{discover_documents, read_document, DocumentRef};
use crate::pipeline::extract::ExtractionClient;
use crate::pipeline::normalize::normalize;
use crate::progress::ProgressCallback;
use crate::table::resume::{load_existing, resume};
use crate::table::sink::TableSink;
use crate::table::OutputTable;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Counters for one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Output table path.
    pub output: PathBuf,
    /// PDF files found in the source directory.
    pub total: usize,
    /// Of those, documents already present in the table at startup.
    pub already_processed: usize,
    /// Documents attempted in this run.
    pub attempted: usize,
    /// Documents that produced rows.
    pub succeeded: usize,
    /// Per-document failures; each document stays pending.
    pub failures: Vec<DocumentError>,
    /// Rows appended in this run.
    pub rows_added: usize,
    /// Rows in the table at the end of the run.
    pub total_rows: usize,
    /// Commits that failed (later commits may have repaired them).
    pub commit_failures: usize,
    /// Whether the file on disk matches the in-memory table at the end.
    pub persisted: bool,
    pub total_duration_ms: u64,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Documents still pending after this run.
    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.already_processed)
            .saturating_sub(self.succeeded)
    }
}

/// Sequences extraction, normalisation and persistence over a directory.
#[derive(Clone)]
pub struct BatchDriver {
    client: ExtractionClient,
    sink: TableSink,
    delay: Duration,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for BatchDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDriver")
            .field("client", &self.client)
            .field("sink", &self.sink)
            .field("delay", &self.delay)
            .finish()
    }
}

impl BatchDriver {
    pub fn new(client: ExtractionClient, sink: TableSink) -> Self {
        Self {
            client,
            sink,
            delay: Duration::ZERO,
            progress: None,
        }
    }

    /// Build a driver writing to `output`, resolving the model from `config`.
    ///
    /// Fails fast on an unsupported output extension or a missing credential.
    pub fn from_config(output: &Path, config: &ExtractionConfig) -> Result<Self, PipelineError> {
        let sink = TableSink::new(output)?;
        let client = ExtractionClient::from_config(config)?;
        Ok(Self {
            client,
            sink,
            delay: Duration::from_millis(config.inter_document_delay_ms),
            progress: config.progress_callback.clone(),
        })
    }

    /// Pause between two consecutive documents.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn sink(&self) -> &TableSink {
        &self.sink
    }

    /// Process every pending PDF in `source_dir`.
    pub async fn run(&self, source_dir: &Path) -> Result<BatchSummary, PipelineError> {
        let documents = discover_documents(source_dir)?;
        Ok(self.run_documents(&documents).await)
    }

    /// Process `documents` (in the given order), skipping those already in
    /// the output table.
    pub async fn run_documents(&self, documents: &[DocumentRef]) -> BatchSummary {
        let start = Instant::now();
        let variant = self.client.variant();

        // ── Step 1: Resume ───────────────────────────────────────────────
        let mut table = load_existing(self.sink.path(), variant);
        let plan = resume(&table, documents);
        let pending = plan.pending.len();

        info!("Found {} PDF files", plan.total);
        info!("Already processed: {}", plan.already_processed);
        info!("Remaining to process: {}", pending);
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(plan.total, plan.already_processed, pending);
        }

        let mut summary = BatchSummary {
            output: self.sink.path().to_path_buf(),
            total: plan.total,
            already_processed: plan.already_processed,
            persisted: true,
            ..Default::default()
        };
        let mut dirty = false;

        // ── Step 2: Process pending documents one by one ─────────────────
        for (i, doc) in plan.pending.iter().enumerate() {
            let index = i + 1;
            if i > 0 && !self.delay.is_zero() {
                debug!("Sleeping {}ms before next document", self.delay.as_millis());
                tokio::time::sleep(self.delay).await;
            }

            info!("Processing {}/{}: {}", index, pending, doc.id);
            if let Some(ref cb) = self.progress {
                cb.on_document_start(index, pending, &doc.id);
            }
            summary.attempted += 1;

            let outcome = match read_document(doc).await {
                Ok(document) => self.client.try_extract(&document).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(record) => {
                    let rows = normalize(&record, &doc.id, variant);
                    let added = rows.len();
                    table.extend(rows);
                    summary.succeeded += 1;
                    summary.rows_added += added;
                    debug!("{}: {} rows", doc.id, added);

                    self.commit(&table, &mut dirty, &mut summary).await;
                    if let Some(ref cb) = self.progress {
                        cb.on_document_complete(index, pending, &doc.id, added);
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    if let Some(ref cb) = self.progress {
                        cb.on_document_error(index, pending, &doc.id, &e.to_string());
                    }
                    summary.failures.push(e);
                    self.commit(&table, &mut dirty, &mut summary).await;
                }
            }
        }

        // ── Step 3: Final flush if the last commit failed ────────────────
        if dirty {
            self.commit(&table, &mut dirty, &mut summary).await;
        }

        summary.persisted = !dirty;
        summary.total_rows = table.len();
        summary.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch complete: {}/{} documents, {} rows added, {} failed, {}ms",
            summary.succeeded,
            summary.attempted,
            summary.rows_added,
            summary.failed(),
            summary.total_duration_ms
        );
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(summary.attempted, summary.succeeded, summary.total_rows);
        }
        summary
    }

    async fn commit(&self, table: &OutputTable, dirty: &mut bool, summary: &mut BatchSummary) {
        match self.sink.commit(table).await {
            Ok(()) => *dirty = false,
            Err(e) => {
                warn!("{}. Rows are kept in memory and written on the next commit.", e);
                *dirty = true;
                summary.commit_failures += 1;
                if let Some(ref cb) = self.progress {
                    cb.on_commit_error(&e.to_string());
                }
            }
        }
    }
}

/// Run a batch over `source_dir`, writing the table to `output`.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(PipelineError)` only for fatal errors, all detected before
/// the first document is processed:
/// - no model credential / provider could be resolved
/// - the output extension is neither `.xlsx` nor `.csv`
/// - the source directory cannot be listed
///
/// Per-document failures are reported in [`BatchSummary::failures`].
pub async fn run_batch(
    source_dir: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<BatchSummary, PipelineError> {
    let source_dir = source_dir.as_ref();
    info!("Starting batch: {} → {}", source_dir.display(), output.as_ref().display());
    let driver = BatchDriver::from_config(output.as_ref(), config)?;
    driver.run(source_dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::pipeline::model::{DocumentModel, InferenceRequest, ModelResponse};
    use crate::progress::BatchProgressCallback;
    use crate::schema::SchemaVariant;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentModel for Echo {
        fn name(&self) -> String {
            "echo".into()
        }

        async fn infer(&self, r: &InferenceRequest<'_>) -> Result<ModelResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if r.document.id.starts_with("bad") {
                return Err(ModelError::Http {
                    status: 400,
                    body: "unsupported".into(),
                });
            }
            Ok(ModelResponse {
                text: r#"{"container_numbers": ["C1", "C2"], "total_amount": 10}"#.into(),
                ..Default::default()
            })
        }
    }

    fn write_pdfs(dir: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(dir.join(name), b"%PDF-1.7 test").unwrap();
        }
    }

    fn driver(model: Arc<Echo>, output: &Path) -> BatchDriver {
        let client = ExtractionClient::new(model, SchemaVariant::ContainerLines, None);
        BatchDriver::new(client, TableSink::new(output).unwrap())
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let output = out.path().join("results.xlsx");
        write_pdfs(src.path(), &["a.pdf", "b.pdf"]);

        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let first = driver(model.clone(), &output).run(src.path()).await.unwrap();
        assert_eq!(first.succeeded, 2);
        assert_eq!(first.rows_added, 4);
        assert!(first.persisted);

        let second = driver(model.clone(), &output).run(src.path()).await.unwrap();
        assert_eq!(second.already_processed, 2);
        assert_eq!(second.attempted, 0);
        assert_eq!(second.total_rows, 4);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_document_stays_pending() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let output = out.path().join("results.csv");
        write_pdfs(src.path(), &["bad.pdf", "good.pdf"]);

        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let summary = driver(model.clone(), &output).run(src.path()).await.unwrap();
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].document(), "bad.pdf");
        assert_eq!(summary.remaining(), 1);

        let again = driver(model, &output).run(src.path()).await.unwrap();
        assert_eq!(again.already_processed, 1);
        assert_eq!(again.attempted, 1);
    }

    #[tokio::test]
    async fn missing_source_dir_is_fatal() {
        let out = tempfile::tempdir().unwrap();
        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let err = driver(model, &out.path().join("r.xlsx"))
            .run(Path::new("/no/such/dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
    }

    /// Turns the output's parent directory into a plain file while the
    /// first document is in flight, then removes it again.
    struct BlockFirstCommit {
        parent: PathBuf,
        commit_errors: AtomicUsize,
    }

    impl BatchProgressCallback for BlockFirstCommit {
        fn on_document_start(&self, index: usize, _pending: usize, _document: &str) {
            if index == 1 {
                std::fs::write(&self.parent, b"not a directory").unwrap();
            }
        }

        fn on_document_complete(&self, index: usize, _pending: usize, _document: &str, _rows: usize) {
            if index == 1 {
                std::fs::remove_file(&self.parent).unwrap();
            }
        }

        fn on_commit_error(&self, _error: &str) {
            self.commit_errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn failed_commit_is_repaired_by_the_next_one() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let parent = out.path().join("sub");
        let output = parent.join("results.csv");
        write_pdfs(src.path(), &["a.pdf", "b.pdf"]);

        let blocker = Arc::new(BlockFirstCommit {
            parent: parent.clone(),
            commit_errors: AtomicUsize::new(0),
        });
        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let summary = driver(model, &output)
            .with_progress(blocker.clone())
            .run(src.path())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.commit_failures, 1);
        assert_eq!(blocker.commit_errors.load(Ordering::SeqCst), 1);
        assert!(summary.persisted);

        let text = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("a.pdf,"));
        assert!(lines[4].starts_with("b.pdf,"));
    }

    #[tokio::test]
    async fn unrepaired_commit_is_reported_as_not_persisted() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let parent = out.path().join("sub");
        std::fs::write(&parent, b"not a directory").unwrap();
        write_pdfs(src.path(), &["a.pdf"]);

        let model = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let summary = driver(model, &parent.join("results.csv"))
            .run(src.path())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total_rows, 2);
        // One commit for the document, one final flush.
        assert_eq!(summary.commit_failures, 2);
        assert!(!summary.persisted);
    }

    #[test]
    fn unsupported_output_fails_before_model_resolution() {
        let err = BatchDriver::from_config(Path::new("out.json"), &ExtractionConfig::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Table(_)));
    }
}
