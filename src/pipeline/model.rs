//! The document-understanding model collaborator.
//!
//! Everything model-specific sits behind [`DocumentModel`]: one call, one
//! document, one fixed instruction + response schema, raw text back. The rest
//! of the pipeline never sees HTTP, provider SDKs or API keys.
//!
//! ## Backends
//!
//! * [`GeminiModel`] — Gemini REST `generateContent` with the PDF sent inline
//!   and `responseSchema` enforcing the JSON contract. The default, and the
//!   only backend that accepts a per-request API key (service mode).
//! * [`ProviderModel`] — any edgequake-llm provider (OpenAI, Anthropic,
//!   Ollama, …). The schema is carried by the instruction text only.
//!
//! ## Retry Strategy
//!
//! [`Retrying`] wraps a backend with exponential backoff
//! (`backoff_ms * 2^(attempt-1)`) for transient failures only
//! ([`ModelError::is_transient`]). With 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s. A 400 or a safety block is returned
//! immediately.

use crate::config::ExtractionConfig;
use crate::error::{ModelError, PipelineError};
use crate::pipeline::document::Document;
use crate::pipeline::encode::{document_attachment, encode_document};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Gemini REST endpoint root.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Environment variables checked, in order, for a Google API key.
pub const GOOGLE_KEY_VARS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// One extraction call.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    pub document: &'a Document,
    /// Field semantics + output contract.
    pub instruction: &'a str,
    /// JSON schema the answer must follow.
    pub response_schema: &'a Value,
}

/// Raw model answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The opaque `infer(document, schema, prompt)` collaborator.
#[async_trait]
pub trait DocumentModel: Send + Sync {
    /// Short label for logs (`gemini/gemini-2.5-flash`, `openai/gpt-4.1`).
    fn name(&self) -> String;

    /// Run one extraction call.
    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, ModelError>;
}

// ── Gemini REST ──────────────────────────────────────────────────────────

/// Gemini `generateContent` backend.
#[derive(Clone)]
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: usize,
    timeout_secs: u64,
}

impl fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiModel")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl GeminiModel {
    /// Create a backend for `api_key` using the generation settings of `config`.
    pub fn new(api_key: impl Into<String>, config: &ExtractionConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: GEMINI_API_BASE.to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
        })
    }

    /// Point the backend at a different API root (proxies, regional endpoints).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_body<'a>(&self, request: &InferenceRequest<'a>) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text {
                        text: request.instruction,
                    },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: request.document.mime_type(),
                            data: encode_document(request.document),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: request.response_schema,
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl DocumentModel for GeminiModel {
    fn name(&self) -> String {
        format!("gemini/{}", self.model)
    }

    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.build_body(request);
        debug!(
            "Sending {} ({} bytes) to {}",
            request.document.id,
            request.document.bytes.len(),
            self.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Transport(format!("invalid response body: {e}")))?;
        parsed.into_model_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_schema: &'a Value,
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GenerateResponse {
    fn into_model_response(self) -> Result<ModelResponse, ModelError> {
        let usage = self.usage_metadata.unwrap_or_default();
        let candidate = self.candidates.into_iter().next();

        let text: String = candidate
            .as_ref()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(ModelError::Blocked { reason });
            }
            return match candidate.and_then(|c| c.finish_reason) {
                Some(reason) if reason != "STOP" => Err(ModelError::Blocked { reason }),
                _ => Err(ModelError::EmptyResponse),
            };
        }

        Ok(ModelResponse {
            text,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}\u{2026}")
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Backend over any edgequake-llm chat provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderModel {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        label: impl Into<String>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            provider,
            label: label.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// User turn accompanying the attachment. The instruction itself travels in
/// the system message.
const PROVIDER_USER_TEXT: &str =
    "Extract the fields from the attached document. Answer with the JSON object only.";

#[async_trait]
impl DocumentModel for ProviderModel {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, ModelError> {
        let messages = vec![
            ChatMessage::system(request.instruction),
            ChatMessage::user_with_images(
                PROVIDER_USER_TEXT,
                vec![document_attachment(request.document)],
            ),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::Provider(format!("{e}")))?;

        if response.content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(ModelResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

// ── Retry decorator ──────────────────────────────────────────────────────

/// Retry settings for transient model failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Initial delay; doubles after each attempt.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1)))
    }
}

/// A [`DocumentModel`] that retries transient failures of an inner model.
pub struct Retrying {
    inner: Arc<dyn DocumentModel>,
    policy: RetryPolicy,
}

impl Retrying {
    pub fn new(inner: Arc<dyn DocumentModel>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl DocumentModel for Retrying {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<ModelResponse, ModelError> {
        let mut attempt = 0;
        loop {
            match self.inner.infer(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let backoff = self.policy.delay_before(attempt);
                    warn!(
                        "{}: attempt {} failed ({}); retry {}/{} after {}ms",
                        request.document.id,
                        attempt,
                        e,
                        attempt,
                        self.policy.max_retries,
                        backoff.as_millis()
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

/// First non-empty Google API key found in the environment.
pub fn google_key_from_env() -> Option<String> {
    GOOGLE_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|key| !key.trim().is_empty())
}

/// Build a retrying Gemini backend for an explicit key.
pub fn gemini_for_key(
    api_key: &str,
    config: &ExtractionConfig,
) -> Result<Arc<dyn DocumentModel>, ModelError> {
    let gemini: Arc<dyn DocumentModel> = Arc::new(GeminiModel::new(api_key, config)?);
    Ok(Arc::new(Retrying::new(
        gemini,
        RetryPolicy::from_config(config),
    )))
}

/// Resolve the model backend, from most-specific to least-specific.
///
/// 1. **Prebuilt backend** (`config.backend`) — used as-is, including its own
///    retry behaviour. Tests and embedding applications use this.
/// 2. **Prebuilt edgequake-llm provider** (`config.provider`).
/// 3. **Named provider** (`config.provider_name`, anything but `google`) —
///    created through [`ProviderFactory::create_llm_provider`], which reads the
///    matching API key from the environment. Requires `config.model`.
/// 4. **Google key** — `config.api_key`, else `GOOGLE_API_KEY` /
///    `GEMINI_API_KEY` → [`GeminiModel`].
/// 5. **Auto-detection** ([`ProviderFactory::from_env`]).
///
/// Fails with [`PipelineError::ProviderNotConfigured`] when nothing matches,
/// so a missing credential stops the run before any document is read.
pub fn resolve_model(config: &ExtractionConfig) -> Result<Arc<dyn DocumentModel>, PipelineError> {
    let policy = RetryPolicy::from_config(config);

    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    if let Some(ref provider) = config.provider {
        let model = ProviderModel::new(Arc::clone(provider), "custom", config);
        return Ok(Arc::new(Retrying::new(Arc::new(model), policy)));
    }

    let named = config
        .provider_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case("google"));
    if let Some(name) = named {
        let model_id = config.model.as_deref().ok_or_else(|| {
            PipelineError::InvalidConfig(format!("a model id is required with provider '{name}'"))
        })?;
        let provider = ProviderFactory::create_llm_provider(name, model_id).map_err(|e| {
            PipelineError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        let model = ProviderModel::new(provider, format!("{name}/{model_id}"), config);
        info!("Using provider {}/{}", name, model_id);
        return Ok(Arc::new(Retrying::new(Arc::new(model), policy)));
    }

    let key = config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(google_key_from_env);
    if let Some(key) = key {
        let model = gemini_for_key(&key, config).map_err(|e| PipelineError::Internal(e.to_string()))?;
        info!("Using {}", model.name());
        return Ok(model);
    }

    if config.provider_name.is_none() {
        if let Ok((provider, _embedding)) = ProviderFactory::from_env() {
            let model = ProviderModel::new(provider, "auto", config);
            info!("Using auto-detected provider");
            return Ok(Arc::new(Retrying::new(Arc::new(model), policy)));
        }
    }

    Err(PipelineError::ProviderNotConfigured {
        provider: config
            .provider_name
            .clone()
            .unwrap_or_else(|| "google".to_string()),
        hint: "No API key found. Set GOOGLE_API_KEY (or GEMINI_API_KEY), pass --api-key, \
               or choose another provider with --provider and --model."
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Scripted {
        answers: Mutex<Vec<Result<ModelResponse, ModelError>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentModel for Scripted {
        fn name(&self) -> String {
            "scripted".into()
        }

        async fn infer(&self, _r: &InferenceRequest<'_>) -> Result<ModelResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.lock().unwrap().remove(0)
        }
    }

    fn doc() -> Document {
        Document::from_bytes("X.pdf", b"%PDF-1.7".to_vec()).unwrap()
    }

    fn ok(text: &str) -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse {
            text: text.into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let inner = Arc::new(Scripted {
            answers: Mutex::new(vec![
                Err(ModelError::Http {
                    status: 503,
                    body: "overloaded".into(),
                }),
                ok("{}"),
            ]),
            calls: AtomicUsize::new(0),
        });
        let model = Retrying::new(
            inner.clone(),
            RetryPolicy {
                max_retries: 3,
                backoff_ms: 1,
            },
        );
        let d = doc();
        let schema = Value::Null;
        let req = InferenceRequest {
            document: &d,
            instruction: "x",
            response_schema: &schema,
        };
        assert_eq!(model.infer(&req).await.unwrap().text, "{}");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let inner = Arc::new(Scripted {
            answers: Mutex::new(vec![Err(ModelError::Http {
                status: 400,
                body: "bad".into(),
            })]),
            calls: AtomicUsize::new(0),
        });
        let model = Retrying::new(
            inner.clone(),
            RetryPolicy {
                max_retries: 3,
                backoff_ms: 1,
            },
        );
        let d = doc();
        let schema = Value::Null;
        let req = InferenceRequest {
            document: &d,
            instruction: "x",
            response_schema: &schema,
        };
        assert!(model.infer(&req).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(Scripted {
            answers: Mutex::new(
                (0..3)
                    .map(|_| Err(ModelError::Transport("reset".into())))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        });
        let model = Retrying::new(
            inner.clone(),
            RetryPolicy {
                max_retries: 2,
                backoff_ms: 1,
            },
        );
        let d = doc();
        let schema = Value::Null;
        let req = InferenceRequest {
            document: &d,
            instruction: "x",
            response_schema: &schema,
        };
        assert_eq!(
            model.infer(&req).await.unwrap_err(),
            ModelError::Transport("reset".into())
        );
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_ms: 500,
        };
        assert_eq!(p.delay_before(1), Duration::from_millis(500));
        assert_eq!(p.delay_before(2), Duration::from_millis(1000));
        assert_eq!(p.delay_before(3), Duration::from_millis(2000));
    }

    #[test]
    fn gemini_request_body_shape() {
        let config = ExtractionConfig::default();
        let model = GeminiModel::new("k", &config).unwrap();
        let d = doc();
        let schema = serde_json::json!({"type": "OBJECT"});
        let req = InferenceRequest {
            document: &d,
            instruction: "extract",
            response_schema: &schema,
        };
        let body = serde_json::to_value(model.build_body(&req)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "extract");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "application/pdf");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
        assert!(model
            .endpoint()
            .ends_with("/models/gemini-2.5-flash:generateContent"));
    }

    #[test]
    fn gemini_response_text_and_usage() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 1200, "candidatesTokenCount": 80}
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let r = parsed.into_model_response().unwrap();
        assert_eq!(r.text, "{\"a\":1}");
        assert_eq!(r.input_tokens, 1200);
        assert_eq!(r.output_tokens, 80);
    }

    #[test]
    fn gemini_blocked_prompt() {
        let raw = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.into_model_response().unwrap_err(),
            ModelError::Blocked {
                reason: "SAFETY".into()
            }
        );

        let raw = r#"{"candidates": [{"finishReason": "STOP"}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.into_model_response().unwrap_err(),
            ModelError::EmptyResponse
        );
    }

    #[test]
    fn prebuilt_backend_wins() {
        let backend: Arc<dyn DocumentModel> = Arc::new(Scripted {
            answers: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        });
        let config = ExtractionConfig::builder()
            .backend(backend)
            .build()
            .unwrap();
        assert_eq!(resolve_model(&config).unwrap().name(), "scripted");
    }

    #[test]
    fn named_provider_requires_model() {
        let config = ExtractionConfig::builder()
            .provider_name("openai")
            .build()
            .unwrap();
        assert!(matches!(
            resolve_model(&config).err(),
            Some(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn explicit_key_selects_gemini() {
        let config = ExtractionConfig::builder()
            .api_key("test-key")
            .build()
            .unwrap();
        assert_eq!(
            resolve_model(&config).unwrap().name(),
            "gemini/gemini-2.5-flash"
        );
    }
}
