//! HTTP upload service.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /extract` | multipart `file` (PDF), `api_key`, optional `prompt`; extracts one document and appends its rows |
//! | `GET /download` | the persisted table as an attachment |
//! | `POST /clear_results` | drop accumulated rows and delete the file |
//! | `GET /prompt` | the instruction used when an upload sends no `prompt` |
//! | `GET /health` | liveness + row count |
//!
//! Every error is answered as `{"success": false, "error": "..."}`.

mod state;

pub use state::{Accumulator, ModelFactory, ServiceState};

use crate::error::DocumentError;
use crate::pipeline::document::{is_pdf_name, sanitize_filename, Document};
use crate::pipeline::extract::ExtractionClient;
use crate::pipeline::normalize::normalize;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Error answered by a handler.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Multipart decoding failed (includes bodies over the size limit).
    #[error("{message}")]
    Upload { status: StatusCode, message: String },

    #[error(transparent)]
    Extraction(#[from] DocumentError),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upload { status, .. } => *status,
            ServiceError::Extraction(DocumentError::NotAPdf { .. }) => StatusCode::BAD_REQUEST,
            ServiceError::Extraction(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<axum::extract::multipart::MultipartError> for ServiceError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        ServiceError::Upload {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

/// Build the service router.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/extract", post(extract))
        .route("/download", get(download))
        .route("/clear_results", post(clear_results))
        .route("/prompt", get(prompt))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: ServiceState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

/// Fields of an `/extract` upload.
#[derive(Default)]
struct Upload {
    api_key: Option<String>,
    prompt: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ServiceError> {
    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "api_key" => upload.api_key = Some(field.text().await?),
            "prompt" => upload.prompt = Some(field.text().await?),
            "file" => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                upload.file = Some((name, bytes.to_vec()));
            }
            _ => {}
        }
    }
    Ok(upload)
}

async fn extract(
    State(state): State<ServiceState>,
    multipart: Multipart,
) -> Result<Json<Value>, ServiceError> {
    let upload = read_upload(multipart).await?;

    let api_key = upload
        .api_key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ServiceError::BadRequest("API key is required".into()))?;
    let (original_name, bytes) = upload
        .file
        .ok_or_else(|| ServiceError::BadRequest("No file uploaded".into()))?;
    if original_name.is_empty() || !is_pdf_name(&original_name) {
        return Err(ServiceError::BadRequest(
            "Invalid file: only .pdf uploads are accepted".into(),
        ));
    }
    let id = sanitize_filename(&original_name)
        .ok_or_else(|| ServiceError::BadRequest("Invalid file name".into()))?;
    let document = Document::from_bytes(id, bytes)?;

    let model = state
        .model_for_key(api_key.trim())
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    let prompt = upload
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(state.prompt());
    let client = ExtractionClient::new(model, state.variant(), Some(prompt));
    let record = client.try_extract(&document).await?;
    let rows = normalize(&record, &document.id, state.variant());

    let mut acc = state.accumulator().lock().await;
    let start = acc.table.len();
    acc.table.extend(rows);
    if let Err(e) = acc.sink.commit(&acc.table).await {
        warn!("{}. Rows are kept in memory and written on the next commit.", e);
    }
    let total = acc.table.len();
    let data = serde_json::to_value(acc.table.views(start..total))
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    info!("{}: {} rows, {} total", document.id, total - start, total);

    Ok(Json(json!({
        "success": true,
        "data": data,
        "total_records": total,
    })))
}

async fn download(State(state): State<ServiceState>) -> Result<Response, ServiceError> {
    let acc = state.accumulator().lock().await;
    let bytes = acc
        .sink
        .read_bytes()
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?
        .ok_or_else(|| ServiceError::NotFound("No results to download".into()))?;

    let disposition = format!("attachment; filename=\"{}\"", acc.sink.file_name());
    Ok((
        [
            (header::CONTENT_TYPE, acc.sink.format().content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn clear_results(State(state): State<ServiceState>) -> Result<Json<Value>, ServiceError> {
    let mut acc = state.accumulator().lock().await;
    acc.table.clear();
    acc.sink
        .clear()
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    Ok(Json(json!({ "success": true })))
}

async fn prompt(State(state): State<ServiceState>) -> Json<Value> {
    Json(json!({
        "variant": state.variant().as_str(),
        "prompt": state.prompt(),
    }))
}

async fn health(State(state): State<ServiceState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "variant": state.variant().as_str(),
        "total_records": state.total_records().await,
    }))
}
