//! Manim render service client
//!
//! `POST {service}/render {"code"}` → `{"success", "videoUrl"?, "videoBase64"?}`
//! or `{"success": false, "error"}` with a non-2xx status.

use crate::types::ProviderError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rendered scene as reported by the render service
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderedVideo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_base64: Option<String>,
}

/// Scene rendering backend
#[async_trait::async_trait]
pub trait SceneRenderer: Send + Sync {
    async fn render(&self, code: &str) -> Result<RenderedVideo, ProviderError>;

    /// Whether the backend answers its health check
    async fn is_available(&self) -> bool;

    fn endpoint(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct RenderBody<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenderResponse {
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    video_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenderFailure {
    #[serde(default)]
    error: Option<String>,
}

pub struct ManimClient {
    http_client: Client,
    service_url: String,
}

impl ManimClient {
    /// `service_url` is expected to be normalised (scheme, no trailing slash)
    pub fn new(service_url: impl Into<String>, render_timeout: Duration) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .timeout(render_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            service_url: service_url.into(),
        })
    }
}

#[async_trait::async_trait]
impl SceneRenderer for ManimClient {
    async fn render(&self, code: &str) -> Result<RenderedVideo, ProviderError> {
        debug!(url = %self.service_url, code_len = code.len(), "Calling render service");

        let response = self
            .http_client
            .post(format!("{}/render", self.service_url))
            .json(&RenderBody { code })
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<RenderFailure>(&raw)
                .ok()
                .and_then(|f| f.error)
                .unwrap_or(raw);
            warn!(status = status.as_u16(), "Render service reported failure");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: message,
            });
        }

        let parsed: RenderResponse = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::Malformed(format!("render response: {}", e)))?;

        info!(
            has_url = parsed.video_url.is_some(),
            has_base64 = parsed.video_base64.is_some(),
            "Scene rendered"
        );
        Ok(RenderedVideo {
            video_url: parsed.video_url,
            video_base64: parsed.video_base64,
        })
    }

    async fn is_available(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/health", self.service_url))
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Render service health check failed");
                false
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.service_url
    }
}
