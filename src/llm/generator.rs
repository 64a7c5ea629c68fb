//! Blocking text generation on top of an async LLM provider.

use std::sync::Arc;

use tokio::runtime::Handle;

use super::litellm::{GenerationRequest, LlmProvider, Message};
use crate::error::ExternalError;
use crate::external::TextGenerator;

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapts an [`LlmProvider`] to the blocking [`TextGenerator`] boundary.
///
/// Each agent gets its own generator so it can use its own model and
/// system prompt. Calls must run on the blocking pool (see
/// [`crate::external::offload`]).
#[derive(Clone)]
pub struct LlmTextGenerator {
    provider: Arc<dyn LlmProvider>,
    handle: Handle,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f64>,
    max_tokens: u32,
}

impl std::fmt::Debug for LlmTextGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmTextGenerator")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmTextGenerator {
    /// # Arguments
    ///
    /// * `provider` - Shared LLM client
    /// * `handle` - Runtime that drives the async request
    /// * `model` - Model name; empty uses the provider's default
    pub fn new(provider: Arc<dyn LlmProvider>, handle: Handle, model: impl Into<String>) -> Self {
        Self {
            provider,
            handle,
            model: model.into(),
            system_prompt: None,
            temperature: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, prompt: &str) -> GenerationRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let mut request =
            GenerationRequest::new(self.model.clone(), messages).with_max_tokens(self.max_tokens);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }
}

impl TextGenerator for LlmTextGenerator {
    fn generate(&self, prompt: &str) -> Result<String, ExternalError> {
        let request = self.build_request(prompt);
        let response = self.handle.block_on(self.provider.generate(request))?;
        match response.first_content() {
            Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
            _ => Err(ExternalError::EmptyResult(format!(
                "model {} returned no content",
                self.model
            ))),
        }
    }
}
