//! Chat-completions API client
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol used by both the
//! reasoning provider (DeepSeek) and the vision provider (SiliconFlow).
//!
//! The response is validated against a typed schema immediately on receipt;
//! any shape mismatch becomes [`ProviderError::Malformed`] rather than being
//! probed field by field.

use crate::types::{ChatMessage, CompletionRequest, ProviderError, ReasoningProvider};
use icecream_common::config::ProviderConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("icecream-gateway/", env!("CARGO_PKG_VERSION"));

/// Request body
#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Response body (only the fields the gateway relies on)
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for one chat-completions endpoint
pub struct ChatCompletionsClient {
    http_client: Client,
    name: &'static str,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(
        name: &'static str,
        config: &ProviderConfig,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            name,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// POST one completion and return the first choice's content
    pub async fn chat(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::NotConfigured(format!("{} API key missing", self.name))
        })?;

        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        debug!(
            provider = self.name,
            model = %self.model,
            messages = request.messages.len(),
            "Calling chat completions"
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(
                provider = self.name,
                status = status.as_u16(),
                "Chat completions returned error status"
            );
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let raw = response.text().await?;
        parse_completion(&raw)
    }
}

/// Validate a chat-completions response body and extract the content
pub(crate) fn parse_completion(raw: &str) -> Result<String, ProviderError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(raw)
        .map_err(|e| ProviderError::Malformed(format!("chat completion body: {}", e)))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("no choices in response".to_string()))?
        .message
        .content
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(content)
}

#[async_trait::async_trait]
impl ReasoningProvider for ChatCompletionsClient {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.chat(&request).await
    }
}
