//! LiteLLM-compatible chat-completions client.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint (LiteLLM proxy,
//! OpenRouter, a local server).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

/// Default model when `LITELLM_DEFAULT_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier. Empty means the client's default model.
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Content of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// Reason the generation stopped ("stop", "length").
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for LiteLLM-compatible APIs.
#[derive(Debug, Clone)]
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl LiteLlmClient {
    /// Creates a client with explicit configuration.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL for the API (e.g., "http://localhost:4000")
    /// * `api_key` - Optional API key for authentication
    /// * `default_model` - Model to use when a request leaves it empty
    ///
    /// # Errors
    ///
    /// Returns `LlmError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client,
        })
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `LITELLM_API_BASE`: Base URL for the API (required)
    /// - `LITELLM_API_KEY`: API key (optional)
    /// - `LITELLM_DEFAULT_MODEL`: Default model
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiBase` if `LITELLM_API_BASE` is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LITELLM_API_KEY").ok().filter(|k| !k.is_empty());
        let default_model =
            env::var("LITELLM_DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_base, api_key, default_model)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Title", "prep-forge");
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request.json(&api_request).send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::RequestFailed(format!("request timed out: {}", e))
            } else {
                LlmError::RequestFailed(e.to_string())
            }
        })?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);
            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        Ok(convert_response(api_response))
    }
}

fn convert_response(api_response: ApiResponse) -> GenerationResponse {
    let choices = api_response
        .choices
        .into_iter()
        .map(|choice| Choice {
            index: choice.index,
            message: Message {
                role: choice.message.role,
                content: choice.message.content.unwrap_or_default(),
            },
            finish_reason: choice.finish_reason.unwrap_or_default(),
        })
        .collect();

    let usage = api_response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    GenerationResponse {
        id: api_response.id,
        model: api_response.model,
        choices,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("s").role, "system");
        assert_eq!(Message::user("u").role, "user");
        assert_eq!(Message::assistant("a").content, "a");
    }

    #[test]
    fn test_request_serialization_skips_unset() {
        let request = GenerationRequest::new("m", vec![Message::user("hi")]).with_max_tokens(64);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 64);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = LiteLlmClient::new("http://localhost:4000/", None, "m").unwrap();
        assert_eq!(client.api_base(), "http://localhost:4000");
        assert!(!client.has_api_key());
        assert_eq!(client.default_model(), "m");
    }

    #[test]
    fn test_convert_response_tolerates_missing_fields() {
        let raw = r#"{"choices":[{"message":{"content":null}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        let response = convert_response(parsed);
        assert_eq!(response.first_content(), Some(""));
        assert_eq!(response.usage.total_tokens, 0);
    }
}
