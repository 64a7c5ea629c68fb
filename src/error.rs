//! Error types shared across prep-forge.
//!
//! Each subsystem gets its own enum. Storage errors are the only class the
//! runner treats as fatal; external-call errors are classified so the agent
//! runtime can decide between retrying and giving up.

use thiserror::Error;

/// Errors raised by the durable queues and session storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An item with this id was already enqueued.
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// The id is already resolved the other way (done vs. failed).
    #[error("Id {id} is already marked {existing}")]
    ConflictingResolution { id: String, existing: &'static str },

    /// No item with this id exists in the queue.
    #[error("Id {0} not found")]
    NotFound(String),

    /// The id cannot be used as a record name on disk.
    #[error("Invalid record id: {0:?}")]
    InvalidId(String),

    /// No staging directory exists for the session.
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// The session directory exists but its metadata is unreadable.
    #[error("Invalid session {id}: {message}")]
    InvalidSession { id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by external collaborators (LLM, search, fetch, evidence writer).
#[derive(Debug, Clone, Error)]
pub enum ExternalError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// The page was reachable but its content is behind a paywall or unreadable.
    #[error("Paywalled or unreadable content at {0}")]
    Paywall(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The collaborator is not configured (missing key, no runtime).
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ExternalError {
    /// Whether retrying the same call later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }
}

/// Errors from the chat-completions client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl From<LlmError> for ExternalError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiBase => ExternalError::Unavailable(err.to_string()),
            LlmError::RequestFailed(msg) if msg.contains("timed out") => {
                ExternalError::Timeout(msg)
            }
            LlmError::RequestFailed(msg) => ExternalError::RequestFailed(msg),
            LlmError::ParseError(msg) => ExternalError::InvalidResponse(msg),
            LlmError::RateLimited(msg) => ExternalError::RateLimited(msg),
            LlmError::ApiError { code: 429, message } => ExternalError::RateLimited(message),
            LlmError::ApiError { code: 401 | 403, message } => {
                ExternalError::Unavailable(format!("authentication rejected: {}", message))
            }
            LlmError::ApiError { code, message } => {
                ExternalError::RequestFailed(format!("status {}: {}", code, message))
            }
        }
    }
}
