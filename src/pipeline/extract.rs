//! Extraction client: one document in, one [`Record`] (or nothing) out.
//!
//! The client owns the fixed instruction and response schema for its variant
//! and turns every failure mode (model error after retries, empty text,
//! invalid JSON, wrong shape) into a [`DocumentError`]. It never panics and
//! never returns a partially parsed record.

use crate::config::ExtractionConfig;
use crate::error::{DocumentError, PipelineError};
use crate::pipeline::document::Document;
use crate::pipeline::model::{resolve_model, DocumentModel, InferenceRequest};
use crate::pipeline::response::clean_json_text;
use crate::prompts::render_instruction;
use crate::record::Record;
use crate::schema::SchemaVariant;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends documents to a [`DocumentModel`] and validates the answers.
#[derive(Clone)]
pub struct ExtractionClient {
    model: Arc<dyn DocumentModel>,
    variant: SchemaVariant,
    instruction: String,
    schema: Value,
}

impl std::fmt::Debug for ExtractionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionClient")
            .field("model", &self.model.name())
            .field("variant", &self.variant)
            .finish()
    }
}

impl ExtractionClient {
    /// Client for `variant` with an optional instruction override.
    pub fn new(model: Arc<dyn DocumentModel>, variant: SchemaVariant, prompt: Option<&str>) -> Self {
        Self {
            model,
            variant,
            instruction: render_instruction(variant, prompt),
            schema: variant.response_schema(),
        }
    }

    /// Resolve the model from `config` and build a client for its variant.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, PipelineError> {
        let model = resolve_model(config)?;
        Ok(Self::new(
            model,
            config.variant,
            config.system_prompt.as_deref(),
        ))
    }

    pub fn variant(&self) -> SchemaVariant {
        self.variant
    }

    pub fn model_name(&self) -> String {
        self.model.name()
    }

    /// The full instruction text sent with every document.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Extract one document, reporting why it failed.
    pub async fn try_extract(&self, document: &Document) -> Result<Record, DocumentError> {
        let request = InferenceRequest {
            document,
            instruction: &self.instruction,
            response_schema: &self.schema,
        };

        let response = self
            .model
            .infer(&request)
            .await
            .map_err(|e| DocumentError::ModelFailed {
                document: document.id.clone(),
                detail: e.to_string(),
            })?;
        debug!(
            "{}: {} input / {} output tokens",
            document.id, response.input_tokens, response.output_tokens
        );

        let cleaned = clean_json_text(&response.text);
        Record::parse(&cleaned).map_err(|e| DocumentError::MalformedResponse {
            document: document.id.clone(),
            detail: e.to_string(),
        })
    }

    /// Extract one document; failures are logged and reported as `None`.
    pub async fn extract(&self, document: &Document) -> Option<Record> {
        match self.try_extract(document).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::pipeline::model::ModelResponse;
    use crate::record::{Cell, Field};
    use async_trait::async_trait;

    struct Fixed(Result<&'static str, ModelError>);

    #[async_trait]
    impl DocumentModel for Fixed {
        fn name(&self) -> String {
            "fixed".into()
        }

        async fn infer(&self, _r: &InferenceRequest<'_>) -> Result<ModelResponse, ModelError> {
            self.0.clone().map(|text| ModelResponse {
                text: text.to_string(),
                ..Default::default()
            })
        }
    }

    fn client(answer: Result<&'static str, ModelError>) -> ExtractionClient {
        ExtractionClient::new(Arc::new(Fixed(answer)), SchemaVariant::ContainerLines, None)
    }

    fn doc() -> Document {
        Document::from_bytes("X.pdf", b"%PDF-1.7".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn fenced_answer_is_parsed() {
        let c = client(Ok("```json\n{\"invoice_number\": \"202057121\"}\n```"));
        let record = c.extract(&doc()).await.unwrap();
        assert_eq!(
            record.field("invoice_number"),
            Field::One(Cell::Text("202057121".into()))
        );
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let c = client(Ok("I could not read this invoice."));
        let err = c.try_extract(&doc()).await.unwrap_err();
        assert!(matches!(err, DocumentError::MalformedResponse { ref document, .. } if document == "X.pdf"));
        assert!(c.extract(&doc()).await.is_none());
    }

    #[tokio::test]
    async fn model_failure_is_reported() {
        let c = client(Err(ModelError::Http {
            status: 403,
            body: "API key invalid".into(),
        }));
        let err = c.try_extract(&doc()).await.unwrap_err();
        assert!(matches!(err, DocumentError::ModelFailed { ref detail, .. } if detail.contains("403")));
    }

    #[tokio::test]
    async fn empty_object_is_a_valid_record() {
        let c = client(Ok("{}"));
        assert!(c.extract(&doc()).await.unwrap().is_empty());
    }

    #[test]
    fn instruction_carries_override() {
        let c = ExtractionClient::new(
            Arc::new(Fixed(Ok("{}"))),
            SchemaVariant::InvoiceSummary,
            Some("Read the PCD only."),
        );
        assert!(c.instruction().starts_with("Read the PCD only."));
        assert_eq!(c.variant(), SchemaVariant::InvoiceSummary);
        assert_eq!(c.model_name(), "fixed");
    }
}
