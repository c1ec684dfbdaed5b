//! Document encoding: raw PDF bytes → base64 payload.
//!
//! Multimodal APIs (Gemini, OpenAI, Anthropic) accept attachments as base64
//! strings embedded in the JSON request body. The PDF is sent as-is: the
//! model reads the native document, so no rasterisation happens locally.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

use crate::pipeline::document::Document;

/// Base64-encode a document for an inline request part.
pub fn encode_document(doc: &Document) -> String {
    let b64 = STANDARD.encode(&doc.bytes);
    debug!("Encoded {} → {} bytes base64", doc.id, b64.len());
    b64
}

/// Wrap a document as an edgequake-llm attachment.
///
/// `ImageData` is the provider-neutral attachment type; providers that accept
/// inline documents forward the MIME type untouched.
pub fn document_attachment(doc: &Document) -> ImageData {
    ImageData::new(encode_document(doc), doc.mime_type())
}
