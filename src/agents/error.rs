//! Error types for agent work.
//!
//! `AgentError` is what a unit of work returns. The runtime classifies it:
//! transient external failures are retried, malformed and permanent errors
//! go straight to the failure registry, a passed deadline leaves the item
//! pending, and storage errors end the agent.

use thiserror::Error;

use crate::error::{ExternalError, StoreError};
use crate::utils::JsonExtractionError;

/// Errors that can occur while an agent processes one item.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A collaborator call (LLM, search, fetch, evidence writer) failed.
    #[error("External call failed: {0}")]
    External(#[from] ExternalError),

    /// Generated or stored input failed validation.
    #[error("Malformed task: {0}")]
    MalformedTask(String),

    /// The item can never succeed; skip retries.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The session deadline passed while the item was in flight.
    #[error("Session deadline exceeded")]
    DeadlineExceeded,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// A blocking call could not be completed on the worker pool.
    #[error("Blocking call failed: {0}")]
    Offload(String),
}

impl AgentError {
    /// Whether the same item may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::External(e) => e.is_transient(),
            AgentError::Offload(_) => true,
            AgentError::MalformedTask(_)
            | AgentError::Permanent(_)
            | AgentError::DeadlineExceeded
            | AgentError::Store(_) => false,
        }
    }
}

impl From<JsonExtractionError> for AgentError {
    fn from(err: JsonExtractionError) -> Self {
        AgentError::External(ExternalError::InvalidResponse(err.to_string()))
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
