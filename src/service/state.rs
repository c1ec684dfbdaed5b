//! Shared state for the upload service.
//!
//! The accumulated table and its sink live behind one `tokio::sync::Mutex`.
//! A request holds the lock from "append rows" to "commit finished", so two
//! uploads never interleave their full-file rewrites. Model calls happen
//! outside the lock.

use crate::config::ExtractionConfig;
use crate::error::ModelError;
use crate::pipeline::model::{gemini_for_key, DocumentModel};
use crate::prompts::default_prompt;
use crate::schema::SchemaVariant;
use crate::table::resume::load_existing;
use crate::table::sink::TableSink;
use crate::table::OutputTable;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Builds a model backend for the API key supplied with a request.
pub type ModelFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn DocumentModel>, ModelError> + Send + Sync>;

/// Rows accumulated by the service and where they are persisted.
#[derive(Debug)]
pub struct Accumulator {
    pub table: OutputTable,
    pub sink: TableSink,
}

/// Application state handed to every handler.
#[derive(Clone)]
pub struct ServiceState {
    accumulator: Arc<Mutex<Accumulator>>,
    models: ModelFactory,
    variant: SchemaVariant,
    prompt: Option<Arc<str>>,
}

impl ServiceState {
    /// State for `sink`, seeded with the rows already persisted there.
    ///
    /// Request models are Gemini backends built from `config` and the
    /// request's API key, unless `config.backend` is set. `config.model`
    /// selects the Gemini model; `config.provider_name` and
    /// `config.provider` are not used. `config.system_prompt` replaces the
    /// default instruction for uploads that send no `prompt`.
    pub fn new(sink: TableSink, config: ExtractionConfig) -> Self {
        let variant = config.variant;
        let prompt = config.system_prompt.as_deref().map(Arc::from);
        let table = load_existing(sink.path(), variant);
        let models: ModelFactory = match config.backend.clone() {
            Some(backend) => Arc::new(move |_key: &str| Ok(Arc::clone(&backend))),
            None => {
                let config = Arc::new(config);
                Arc::new(move |key: &str| gemini_for_key(key, &config))
            }
        };
        Self {
            accumulator: Arc::new(Mutex::new(Accumulator { table, sink })),
            models,
            variant,
            prompt,
        }
    }

    /// Replace how per-request models are built.
    pub fn with_model_factory(mut self, models: ModelFactory) -> Self {
        self.models = models;
        self
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    /// Instruction used when an upload sends no `prompt` field.
    pub fn prompt(&self) -> &str {
        match self.prompt {
            Some(ref p) => &**p,
            None => default_prompt(self.variant),
        }
    }

    pub(crate) fn model_for_key(&self, key: &str) -> Result<Arc<dyn DocumentModel>, ModelError> {
        (self.models)(key)
    }

    pub(crate) fn accumulator(&self) -> &Mutex<Accumulator> {
        &self.accumulator
    }

    /// Rows currently held by the service.
    pub async fn total_records(&self) -> usize {
        self.accumulator.lock().await.table.len()
    }
}
