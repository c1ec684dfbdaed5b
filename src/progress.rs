//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the batch driver works through a directory. The CLI uses it to
//! drive a terminal progress bar; an embedding application can forward the
//! events anywhere else without the library knowing about it.
//!
//! # Example
//!
//! ```rust
//! use logi_extract::{BatchProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RowCounter {
//!     rows: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for RowCounter {
//!     fn on_document_complete(&self, _index: usize, _total: usize, _id: &str, rows: usize) {
//!         self.rows.fetch_add(rows, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(RowCounter { rows: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` arguments are 1-based positions among the
/// pending documents.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after resume, before the first document.
    ///
    /// # Arguments
    /// * `total`             — documents found in the source directory
    /// * `already_processed` — of those, documents already in the table
    /// * `pending`           — documents that will be attempted now
    fn on_batch_start(&self, total: usize, already_processed: usize, pending: usize) {
        let _ = (total, already_processed, pending);
    }

    /// Called just before a document is read and sent to the model.
    fn on_document_start(&self, index: usize, pending: usize, document: &str) {
        let _ = (index, pending, document);
    }

    /// Called when a document produced rows and they were committed.
    fn on_document_complete(&self, index: usize, pending: usize, document: &str, rows: usize) {
        let _ = (index, pending, document, rows);
    }

    /// Called when a document failed; it stays pending for the next run.
    fn on_document_error(&self, index: usize, pending: usize, document: &str, error: &str) {
        let _ = (index, pending, document, error);
    }

    /// Called when persisting the table failed. Rows stay in memory and are
    /// written by the next successful commit.
    fn on_commit_error(&self, error: &str) {
        let _ = error;
    }

    /// Called once after every pending document has been attempted.
    fn on_batch_complete(&self, attempted: usize, succeeded: usize, total_rows: usize) {
        let _ = (attempted, succeeded, total_rows);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        rows: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_document_start(&self, _index: usize, _pending: usize, _document: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _index: usize, _pending: usize, _document: &str, rows: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.rows.fetch_add(rows, Ordering::SeqCst);
        }

        fn on_document_error(&self, _index: usize, _pending: usize, _document: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(5, 2, 3);
        cb.on_document_start(1, 3, "a.pdf");
        cb.on_document_complete(1, 3, "a.pdf", 2);
        cb.on_document_error(2, 3, "b.pdf", "timeout");
        cb.on_commit_error("disk full");
        cb.on_batch_complete(3, 2, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_document_start(1, 2, "a.pdf");
        tracker.on_document_complete(1, 2, "a.pdf", 3);
        tracker.on_document_start(2, 2, "b.pdf");
        tracker.on_document_error(2, 2, "b.pdf", "HTTP 400");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.rows.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(1, 0, 1);
        cb.on_batch_complete(1, 1, 1);
    }
}
