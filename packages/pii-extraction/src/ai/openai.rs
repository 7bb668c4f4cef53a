//! OpenAI-compatible chat-completion client.
//!
//! # Example
//!
//! ```rust,ignore
//! use pii_extraction::ai::OpenAiChat;
//!
//! let expert = OpenAiChat::new("sk-...").with_model("gpt-4o");
//! let creator = OpenAiChat::new("sk-...").with_model("o1-preview");
//! let orchestrator = Orchestrator::new(Arc::new(expert), Arc::new(creator), library, config);
//! ```

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{ExtractionError, Result};
use crate::traits::llm::LlmClient;
use crate::types::conversation::Turn;

/// Chat client for any `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    temperature: Option<f32>,
}

impl OpenAiChat {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: SecretString::from(api_key.into()),
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: None,
        }
    }

    /// Set the chat model (default: gpt-4o).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, self-hosted servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sampling temperature. Omitted from requests when unset, since some
    /// reasoning models reject it.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, system_prompt: &'a str, turns: &'a [Turn]) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: system_prompt,
        });
        messages.extend(turns.iter().map(|t| ChatMessage {
            role: t.role.as_str(),
            content: &t.content,
        }));
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        }
    }
}

impl fmt::Debug for OpenAiChat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiChat")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[async_trait]
impl LlmClient for OpenAiChat {
    async fn send(&self, system_prompt: &str, turns: &[Turn]) -> Result<String> {
        let request = self.request(system_prompt, turns);
        debug!(model = %self.model, turns = turns.len(), "Chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::AI(e.to_string().into()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExtractionError::AI(
                format!("chat completion failed ({status}): {error_text}").into(),
            ));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::AI(e.to_string().into()))?;

        first_choice(chat_response)
    }
}

fn first_choice(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ExtractionError::AI("no choices in chat completion".into()))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
