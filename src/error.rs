//! Error taxonomy for the AI core.
//!
//! Four failure classes cross the public surface: missing provider
//! configuration, provider (embedding/chat/transcription) backend errors,
//! vector index persistence errors, and note store errors. Index/store
//! drift — an index entry pointing at a note that no longer exists — is
//! deliberately *not* an error; the retriever filters it silently.
//!
//! No operation retries automatically beyond the provider client's HTTP
//! backoff; retry policy belongs to the caller.

use thiserror::Error;

/// Errors surfaced by the embedding index, retriever, and chat pipeline.
#[derive(Debug, Error)]
pub enum AiError {
    /// AI features are disabled or the API key is missing. Fatal to the
    /// call; never retried.
    #[error("AI is not configured: {0}")]
    NotConfigured(String),

    /// The embedding, chat, or transcription backend failed. Safe to retry
    /// the whole operation: chunk identity assignment is deterministic.
    #[error("provider error: {0}")]
    Provider(String),

    /// Vector index persistence or lookup failed. A failed note upsert may
    /// leave a partial chunk run; a later successful update repairs it.
    #[error("index error: {0}")]
    Index(String),

    /// Note store query failed.
    #[error("note store error: {0}")]
    Store(String),
}

impl From<std::io::Error> for AiError {
    fn from(err: std::io::Error) -> Self {
        AiError::Index(err.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        AiError::Index(err.to_string())
    }
}

impl From<sqlx::Error> for AiError {
    fn from(err: sqlx::Error) -> Self {
        AiError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Provider(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AiError>;
