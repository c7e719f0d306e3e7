//! Chat-completion client.
//!
//! The retrieval engine talks to the language model only through the
//! [`CompletionService`] trait. [`OpenAiCompletion`] speaks the OpenAI
//! `POST {base_url}/chat/completions` protocol, which also covers Ollama's
//! OpenAI-compatible endpoint (`{url}/v1`). [`DisabledCompletion`] is used
//! when `completion.provider = "disabled"`: uploads and listing work, queries
//! fail with a clear error.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::CompletionConfig;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("completion provider is disabled")]
    Disabled,

    #[error("{0} environment variable not set")]
    MissingApiKey(String),

    #[error("completion request failed: {0}")]
    Http(String),

    #[error("completion API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    /// Model reported by the provider, which may differ from the requested alias.
    pub model: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError>;
}

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompletion {
    name: String,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_key_env: String::new(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// OpenAI proper. The key is read from `api_key_env` now and required
    /// only when a completion is requested.
    pub fn openai(config: &CompletionConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var(&config.api_key_env).ok();
        let mut client = Self::new(
            "openai",
            base_url,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?;
        client.api_key_env = config.api_key_env.clone();
        Ok(client)
    }

    /// Ollama's OpenAI-compatible endpoint; no key needed.
    pub fn ollama(config: &CompletionConfig) -> Result<Self> {
        let url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let base_url = if url.ends_with("/v1") {
            url
        } else {
            format!("{}/v1", url.trim_end_matches('/'))
        };
        Self::new(
            "ollama",
            base_url,
            None,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        if self.api_key.is_none() && !self.api_key_env.is_empty() {
            return Err(CompletionError::MissingApiKey(self.api_key_env.clone()));
        }

        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CompletionError::Http(format!("{} ({}): {}", self.name, url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
        parse_chat_response(&json, &request.model)
    }
}

/// Parse an OpenAI chat-completions response body.
pub fn parse_chat_response(
    json: &Value,
    requested_model: &str,
) -> Result<ChatResponse, CompletionError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| CompletionError::MalformedResponse("no choices in response".into()))?;

    let usage = json["usage"].as_object().map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        content: choice["message"]["content"].as_str().map(String::from),
        model: json["model"]
            .as_str()
            .unwrap_or(requested_model)
            .to_string(),
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        usage,
    })
}

/// Completion service that refuses every request.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionService for DisabledCompletion {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        Err(CompletionError::Disabled)
    }
}

/// Build the completion service named by `completion.provider`.
pub fn create_completion(config: &CompletionConfig) -> Result<Box<dyn CompletionService>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiCompletion::openai(config)?)),
        "ollama" => Ok(Box::new(OpenAiCompletion::ollama(config)?)),
        "disabled" => Ok(Box::new(DisabledCompletion)),
        other => anyhow::bail!("Unknown completion provider: {}", other),
    }
}
