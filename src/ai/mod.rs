use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

mod error;
pub mod prompts;
mod response;

pub use error::LlmError;
pub use response::{extract_code_block, parse_generated_solutions, GeneratedSolution};

use crate::config::{AIConfig, AIProvider, Config};
use crate::retry::{with_retries, RetryPolicy};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Text generation backend. Everything that consumes it treats the model as optional.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.generate(&[ChatMessage::user(prompt)], system_prompt, temperature, max_tokens)
            .await
    }
}

/// Hosted chat-completion API (Anthropic messages or OpenAI chat completions).
pub struct RemoteModel {
    provider: AIProvider,
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl RemoteModel {
    pub fn from_config(config: &AIConfig) -> Result<Self, LlmError> {
        if !config.enabled {
            return Err(LlmError::NotConfigured);
        }
        let api_key = config
            .api_key()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LlmError::NotConfigured)?
            .to_string();

        let base_url = config.api_url.clone().unwrap_or_else(|| {
            match config.provider {
                AIProvider::Anthropic => ANTHROPIC_BASE_URL,
                AIProvider::OpenAI => OPENAI_BASE_URL,
            }
            .to_string()
        });

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::ServiceError(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            provider: config.provider,
            model: config.model.clone(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let invalid = |e: reqwest::header::InvalidHeaderValue| LlmError::ServiceError(format!("invalid API key: {}", e));
        match self.provider {
            AIProvider::Anthropic => {
                headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
                headers.insert("x-api-key", HeaderValue::from_str(&self.api_key).map_err(invalid)?);
            }
            AIProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(invalid)?,
                );
            }
        }
        Ok(headers)
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> (String, serde_json::Value) {
        match self.provider {
            AIProvider::Anthropic => {
                let mut body = json!({
                    "model": &self.model,
                    "max_tokens": max_tokens,
                    "temperature": temperature,
                    "messages": messages,
                });
                if let Some(system) = system_prompt {
                    body["system"] = json!(system);
                }
                (format!("{}/v1/messages", self.base_url), body)
            }
            AIProvider::OpenAI => {
                let mut all = Vec::with_capacity(messages.len() + 1);
                if let Some(system) = system_prompt {
                    all.push(json!({ "role": "system", "content": system }));
                }
                all.extend(messages.iter().map(|m| json!(m)));
                let body = json!({
                    "model": &self.model,
                    "max_tokens": max_tokens,
                    "temperature": temperature,
                    "messages": all,
                });
                (format!("{}/v1/chat/completions", self.base_url), body)
            }
        }
    }

    async fn send_once(&self, url: &str, body: &serde_json::Value) -> Result<String, LlmError> {
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(LlmError::ServiceUnavailable("rate limit exceeded".to_string()));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(LlmError::ServiceError("authentication failed".to_string()));
            }
            status if status.is_server_error() => {
                return Err(LlmError::ServiceUnavailable(format!("status {}", status)));
            }
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "could not read error response".to_string());
                return Err(LlmError::ServiceError(format!(
                    "unexpected status {}: {}",
                    status, body
                )));
            }
        }

        let text = response.text().await?;
        let content = match self.provider {
            AIProvider::Anthropic => {
                let parsed: AnthropicResponse = serde_json::from_str(&text)?;
                parsed
                    .content
                    .into_iter()
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join("")
            }
            AIProvider::OpenAI => {
                let parsed: OpenAiResponse = serde_json::from_str(&text)?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .unwrap_or_default()
            }
        };

        if content.trim().is_empty() {
            return Err(LlmError::ServiceError("empty response".to_string()));
        }
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for RemoteModel {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let (url, body) = self.request_body(messages, system_prompt, temperature, max_tokens);
        debug!(provider = ?self.provider, model = %self.model, "sending generation request");
        with_retries(&self.retry, LlmError::is_transient, || self.send_once(&url, &body)).await
    }
}

/// Builds the configured model, or `None` when generation is disabled or has no key.
pub fn from_config(config: &Config) -> Option<Arc<dyn LanguageModel>> {
    match RemoteModel::from_config(&config.ai) {
        Ok(model) => Some(Arc::new(model)),
        Err(LlmError::NotConfigured) => None,
        Err(e) => {
            warn!(error = %e, "language model disabled");
            None
        }
    }
}
