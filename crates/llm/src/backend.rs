//! Completion backends
//!
//! [`OpenAiBackend`] speaks the OpenAI-compatible chat completions API,
//! which covers hosted endpoints as well as local servers (vLLM, Ollama's
//! compatibility route). The rate-limit and retry discipline lives in
//! [`crate::provider::CompletionProvider`]; backends only translate
//! requests and classify raw failures.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::LlmError;

/// Completion backend configuration.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// API endpoint base (e.g. https://api.openai.com/v1)
    pub endpoint: String,
    /// API key; may be empty for local endpoints
    pub api_key: String,
    /// Model id
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
        }
    }
}

impl CompletionConfig {
    /// Config for a local OpenAI-compatible server.
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: "not-needed".to_string(),
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Completion backend trait. `request_id` ties log lines across retries.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Generate text for a prompt.
    async fn generate(&self, prompt: &str, request_id: &str) -> Result<String, LlmError>;

    /// Model id served by this backend.
    fn model_name(&self) -> &str;

    /// Provider tag used by the rate limiter and error messages.
    fn provider_name(&self) -> &str;

    /// Lightweight availability probe.
    async fn is_available(&self) -> bool {
        true
    }
}

/// OpenAI-compatible chat completions backend.
pub struct OpenAiBackend {
    config: CompletionConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(config: CompletionConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() && !config.endpoint.contains("localhost")
            && !config.endpoint.contains("127.0.0.1")
        {
            return Err(LlmError::Configuration(
                "API key required for remote completion endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    /// Classify an HTTP-level failure into the error taxonomy. Remaining
    /// attempts are filled in by the provider wrapper.
    fn classify_status(status: reqwest::StatusCode, body: &str, provider: &str) -> LlmError {
        if status.as_u16() == 429 || crate::rate_limit::is_rate_limit_message(body) {
            LlmError::GenRateLimited {
                provider: provider.to_string(),
                delay_ms: 0,
                remaining_attempts: 0,
            }
        } else if body.to_lowercase().contains("content_filter")
            || body.to_lowercase().contains("safety")
        {
            LlmError::GenSafetyBlocked(body.to_string())
        } else {
            LlmError::GenProviderDown(format!("HTTP {}: {}", status, body))
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn generate(&self, prompt: &str, request_id: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        tracing::debug!(
            request_id,
            model = %self.config.model,
            prompt_chars = prompt.len(),
            "Completion request"
        );

        let response = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::GenTimeout {
                        provider: self.provider_name().to_string(),
                        remaining_attempts: 0,
                    }
                } else {
                    LlmError::GenProviderDown(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body, self.provider_name()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::GenProviderDown(format!("Invalid response body: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::GenProviderDown("No choices in response".to_string()))?;

        tracing::debug!(
            request_id,
            finish_reason = choice.finish_reason.as_deref().unwrap_or("stop"),
            "Completion response"
        );

        Ok(choice.message.content)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// OpenAI-compatible API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}
