//! Core Types and Trait Definitions for the gateway
//!
//! Defines the provider seams of the reconciliation layer:
//! - **RecognitionProvider:** one OCR/vision backend, image in, text out
//! - **ReasoningProvider:** one chat-completions style model endpoint
//!
//! Every external call is normalised into `Result<_, ProviderError>` at this
//! boundary so that tiering, fallbacks and default values can be decided by
//! the callers without knowing which backend produced the failure.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Provider errors
// ============================================================================

/// Failure of a single provider call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Credentials or endpoint missing from configuration
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Caller-level timeout elapsed; the in-flight call was abandoned
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx response
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response did not match the expected schema
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Successful call that produced no usable content
    #[error("Empty response")]
    EmptyResponse,

    /// Backend reported an expected failure (job failed, upload exhausted, ...)
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Run a provider future under a caller-level timeout
///
/// On expiry the future is dropped (abandoning the in-flight call) and the
/// attempt is reported as [`ProviderError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

// ============================================================================
// Images
// ============================================================================

/// Image submitted for recognition
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl ImageInput {
    /// Wrap raw bytes, sniffing the MIME type (defaults to `image/jpeg`)
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        let mime_type = infer::get(&bytes)
            .map(|kind| kind.mime_type())
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        Self {
            bytes,
            filename: filename.into(),
            mime_type,
        }
    }

    /// Decode a base64 payload, tolerating a `data:image/...;base64,` prefix
    pub fn from_base64(encoded: &str, filename: impl Into<String>) -> Result<Self, String> {
        let payload = match encoded.find(";base64,") {
            Some(idx) if encoded.starts_with("data:") => &encoded[idx + ";base64,".len()..],
            _ => encoded,
        };
        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| format!("invalid base64 image: {}", e))?;
        if bytes.is_empty() {
            return Err("image payload is empty".to_string());
        }
        Ok(Self::new(bytes, filename))
    }

    /// `data:` URL for multimodal chat payloads
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }
}

// ============================================================================
// Chat-completions messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a multimodal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// User message carrying an instruction and an image
    pub fn user_with_image(text: impl Into<String>, image: &ImageInput) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.to_data_url(),
                    },
                },
            ]),
        }
    }
}

/// Request to a reasoning provider; the model is fixed by the provider config
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask for `response_format: {"type": "json_object"}`
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            messages,
            temperature,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

// ============================================================================
// Provider traits
// ============================================================================

/// A single external recognition backend
///
/// Implementations normalise every provider-specific response into one
/// `text` string; empty text is reported as [`ProviderError::EmptyResponse`].
#[async_trait::async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Provider name for diagnostics and tier reporting
    fn name(&self) -> &'static str;

    /// Caller-level ceiling for one `recognize` call
    ///
    /// Synchronous providers use the per-call timeout as-is; providers that
    /// run a job lifecycle widen it to cover their own polling budget.
    fn time_budget(&self, per_call: Duration) -> Duration {
        per_call
    }

    /// Recognise text in an image
    async fn recognize(&self, image: &ImageInput) -> Result<String, ProviderError>;
}

/// A chat-completions style model endpoint returning free-form content
#[async_trait::async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one completion and return the first choice's content
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}

/// Strip Markdown code fences (```json ... ```) that models wrap JSON in
pub fn strip_code_fences(content: &str) -> String {
    content
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Truncate to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_from_base64_strips_data_url() {
        let png_header = [0x89u8, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let encoded = format!("data:image/png;base64,{}", BASE64.encode(png_header));
        let image = ImageInput::from_base64(&encoded, "roster.png").unwrap();
        assert_eq!(image.bytes, png_header.to_vec());
        assert_eq!(image.mime_type, "image/png");
        assert!(image.to_data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_image_unknown_bytes_default_to_jpeg() {
        let image = ImageInput::new(b"plain bytes".to_vec(), "x");
        assert_eq!(image.mime_type, "image/jpeg");
    }

    #[test]
    fn test_image_from_base64_rejects_garbage() {
        assert!(ImageInput::from_base64("!!!not base64!!!", "x").is_err());
        assert!(ImageInput::from_base64("", "x").is_err());
    }

    #[test]
    fn test_multimodal_message_serialization() {
        let image = ImageInput::new(vec![1, 2, 3], "x.jpg");
        let msg = ChatMessage::user_with_image("read this", &image);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert!(value["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));

        let plain = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(plain["content"], "hi");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1,2]\n```"), "[1,2]");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("张三李四", 2), "张三");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_with_timeout_reports_timeout() {
        let result: Result<(), ProviderError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(ProviderError::Timeout(Duration::from_millis(10))));
    }
}
