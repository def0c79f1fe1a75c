//! AI backend client
//!
//! OpenAI-compatible `/chat/completions` over raw `reqwest`. The trait is
//! the seam where tests substitute a scripted backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uiheal_common::config::BackendConfig;

use crate::error::BackendError;

/// Structured prompt: standing instructions plus the task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Stateless text-completion service
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// One completion; callers may repeat it freely
    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Chat-completions backend (DeepSeek by default)
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl ChatCompletionsBackend {
    /// Build from configuration, resolving the credential from the environment
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| BackendError::MissingCredential(config.api_key_env.clone()))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &BackendConfig, api_key: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn post_completions(
        &self,
        body: &ChatRequest<'_>,
    ) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        // Map HTTP error codes to typed errors.
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited);
        }
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
        {
            return Err(BackendError::Timeout);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        Ok(resp)
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            stream: false,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self.post_completions(&body).await?;
        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(model = %self.model, chars = content.len(), "Completion received");

        if content.trim().is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(content)
    }
}
