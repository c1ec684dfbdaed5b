//! Pipeline stages for turning one PDF into table rows.
//!
//! Each submodule implements exactly one step.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ encode ──▶ model ──▶ response ──▶ extract ──▶ normalize
//! (%PDF bytes) (base64)  (infer)   (cleanup)    (Record)    (Rows)
//! ```
//!
//! 1. [`document`]  — discover `*.pdf` files, read them, check the magic bytes
//! 2. [`encode`]    — base64-wrap the document for the multimodal request
//! 3. [`model`]     — the model collaborator with retry/backoff; the only
//!    stage with network I/O
//! 4. [`response`]  — deterministic cleanup of the raw answer text
//! 5. [`extract`]   — parse the answer into a [`crate::record::Record`]
//! 6. [`normalize`] — expand the record into full-width rows

pub mod document;
pub mod encode;
pub mod extract;
pub mod model;
pub mod normalize;
pub mod response;
