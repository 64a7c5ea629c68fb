//! LLM integration for prep-forge.
//!
//! [`LiteLlmClient`] speaks the OpenAI-compatible chat-completions protocol.
//! [`LlmTextGenerator`] wraps any [`LlmProvider`] as the blocking
//! [`crate::external::TextGenerator`] the agents call through `offload`.
//!
//! ```ignore
//! use prep_forge::llm::{LiteLlmClient, LlmTextGenerator};
//! use std::sync::Arc;
//!
//! let client = Arc::new(LiteLlmClient::from_env()?);
//! let generator = LlmTextGenerator::new(client, tokio::runtime::Handle::current(), "")
//!     .with_system_prompt("You are a debate research strategist.");
//! ```

pub mod generator;
pub mod litellm;

pub use generator::LlmTextGenerator;
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
