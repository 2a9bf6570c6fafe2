use crate::types::{RelayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One completion call: an optional system prompt plus the user's prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
}

/// Trait for language-model providers the chat queue can call
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Get the name of this LLM adapter
    fn adapter_name(&self) -> String;

    /// Run one completion and return the answer text.
    ///
    /// Failures carry the HTTP status when the provider answered with one.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Provider speaking the OpenAI-compatible `/chat/completions` API.
pub struct OpenAiCompatibleAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatibleAdapter {
    fn adapter_name(&self) -> String {
        format!("OpenAI-compatible ({})", self.base_url)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = request.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            messages.push(ChatMessage {
                role: "system",
                content: system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user_prompt,
        });

        let body = ChatCompletionBody {
            model: &request.model,
            messages,
        };

        let mut http_request = self.client.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await.map_err(|e| RelayError::ProviderFailure {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        debug!("Completion provider answered with status {}", status);

        if !status.is_success() {
            return Err(RelayError::ProviderFailure {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| RelayError::ProviderFailure {
                status: Some(status.as_u16()),
                message: format!("invalid response: {}", e),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| RelayError::ProviderFailure {
                status: Some(status.as_u16()),
                message: "empty completion".to_string(),
            })
    }
}
