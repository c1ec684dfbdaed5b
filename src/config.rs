//! Configuration for batch extraction and the upload service.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`] and shared by the batch driver, the
//! service and the model resolver.

use crate::error::PipelineError;
use crate::pipeline::model::DocumentModel;
use crate::progress::ProgressCallback;
use crate::schema::SchemaVariant;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Configuration for an extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use logi_extract::{ExtractionConfig, SchemaVariant};
///
/// let config = ExtractionConfig::builder()
///     .variant(SchemaVariant::InvoiceSummary)
///     .model("gemini-2.5-flash")
///     .inter_document_delay_ms(250)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Output table layout. Default: [`SchemaVariant::ContainerLines`].
    pub variant: SchemaVariant,

    /// Model identifier, e.g. "gemini-2.5-flash", "gpt-4.1".
    /// If None, the Gemini backend uses `gemini-2.5-flash`.
    pub model: Option<String>,

    /// edgequake-llm provider name (e.g. "openai", "anthropic", "ollama").
    /// None or "google" selects the Gemini REST backend.
    pub provider_name: Option<String>,

    /// Pre-constructed edgequake-llm provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed model backend. Takes precedence over everything else.
    pub backend: Option<Arc<dyn DocumentModel>>,

    /// Google API key. Falls back to `GOOGLE_API_KEY` / `GEMINI_API_KEY`.
    pub api_key: Option<String>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per document. Default: 8192.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient model failure. Default: 3.
    ///
    /// Permanent errors (bad API key, 400, safety block) are not retried.
    /// They surface as [`crate::error::DocumentError`] immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom field instructions. If None, uses the variant's built-in prompt.
    /// The response schema is appended either way.
    pub system_prompt: Option<String>,

    /// Pause between two documents of a batch, in milliseconds. Default: 1000.
    pub inter_document_delay_ms: u64,

    /// Optional progress callback for per-document events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            variant: SchemaVariant::default(),
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            api_key: None,
            temperature: 0.0,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            system_prompt: None,
            inter_document_delay_ms: 1000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("variant", &self.variant)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("inter_document_delay_ms", &self.inter_document_delay_ms)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn variant(mut self, variant: SchemaVariant) -> Self {
        self.config.variant = variant;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn DocumentModel>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn inter_document_delay_ms(mut self, ms: u64) -> Self {
        self.config.inter_document_delay_ms = ms;
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, PipelineError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if matches!(c.model.as_deref(), Some(m) if m.trim().is_empty()) {
            return Err(PipelineError::InvalidConfig("model id is empty".into()));
        }
        Ok(self.config)
    }
}
