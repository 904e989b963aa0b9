//! Request-level error types.

use thiserror::Error;

use crate::rewrite::decompress::GzipError;

/// Errors from buffering or rewriting a request body.
///
/// Read and size errors abort the request. Decode, parse and serialize errors
/// are recovered inside the pipeline by forwarding the bytes already held.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("failed to read request body: {0}")]
    BodyRead(#[source] axum::Error),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to decode request body: {0}")]
    Decode(#[from] GzipError),

    #[error("request body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("request body is not a JSON object: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to serialize rewritten body: {0}")]
    Serialize(#[source] serde_json::Error),
}
