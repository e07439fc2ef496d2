//! Configuration loading for the ICeCream gateway
//!
//! Provides multi-tier configuration resolution with ENV → TOML → default
//! priority. The result is an immutable [`GatewayConfig`] built once at
//! startup and handed to every component that needs it; nothing re-reads the
//! environment per request.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.75;
pub const DEFAULT_DEEPSEEK_BASE: &str = "https://api.deepseek.com";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const DEFAULT_SILICONFLOW_BASE: &str = "https://api.siliconflow.cn/v1";
pub const DEFAULT_VISION_MODEL: &str = "PaddlePaddle/PaddleOCR-VL-1.5";
pub const DEFAULT_MINERU_BASE: &str = "https://mineru.net";
pub const DEFAULT_MANIM_URL: &str = "http://localhost:8001";

// ============================================================================
// TOML file layout
// ============================================================================

/// On-disk configuration. Every field is optional; absent values fall back to
/// environment variables and compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub intent: IntentToml,
    pub deepseek: ProviderToml,
    pub siliconflow: ProviderToml,
    pub mineru: MineruToml,
    pub cloud_job: CloudJobToml,
    pub timeouts: TimeoutsToml,
    pub manim: ManimToml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentToml {
    pub enabled: Option<bool>,
    pub confidence_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MineruToml {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudJobToml {
    pub upload_attempts: Option<u32>,
    pub upload_retry_delay_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsToml {
    pub provider_call_secs: Option<u64>,
    pub generation_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManimToml {
    pub service_url: Option<String>,
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Intent classifier settings
#[derive(Debug, Clone, PartialEq)]
pub struct IntentConfig {
    pub enabled: bool,
    pub confidence_threshold: f32,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// A chat-completions style provider endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// MinerU cloud parser endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct MineruConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub enabled: bool,
}

/// Retry and polling budget for asynchronous recognition jobs
#[derive(Debug, Clone, PartialEq)]
pub struct CloudJobConfig {
    pub upload_attempts: u32,
    pub upload_retry_delay: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for CloudJobConfig {
    fn default() -> Self {
        Self {
            upload_attempts: 6,
            upload_retry_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(3000),
            max_wait: Duration::from_millis(60_000),
        }
    }
}

/// Caller-level timeouts for outbound provider calls
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutConfig {
    /// Recognition, classification, chat and extraction calls
    pub provider_call: Duration,
    /// Long-running generation calls (layout generator, animation code)
    pub generation: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_call: Duration::from_secs(30),
            generation: Duration::from_secs(60),
        }
    }
}

/// Fully resolved, immutable gateway configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: u16,
    pub intent: IntentConfig,
    pub reasoning: ProviderConfig,
    pub vision: ProviderConfig,
    pub mineru: MineruConfig,
    pub cloud_job: CloudJobConfig,
    pub timeouts: TimeoutConfig,
    pub manim_service_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::resolve_with(|_| None, &TomlConfig::default())
    }
}

impl GatewayConfig {
    /// Resolve configuration from the process environment and a TOML config
    pub fn from_env_and_toml(toml_config: &TomlConfig) -> Self {
        Self::resolve_with(|name| std::env::var(name).ok(), toml_config)
    }

    /// Resolve configuration with an explicit environment lookup
    ///
    /// **Priority:** ENV → TOML → compiled default
    pub fn resolve_with<F>(env: F, toml_config: &TomlConfig) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let port = env("PORT")
            .and_then(|v| parse_env_value::<u16>("PORT", &v))
            .or(toml_config.port)
            .unwrap_or(DEFAULT_PORT);

        let enabled = match env("INTENT_CLASSIFIER_ENABLED") {
            Some(v) => v.trim() == "true",
            None => toml_config.intent.enabled.unwrap_or(false),
        };

        let confidence_threshold = env("INTENT_CONFIDENCE_THRESHOLD")
            .and_then(|v| parse_env_value::<f32>("INTENT_CONFIDENCE_THRESHOLD", &v))
            .or(toml_config.intent.confidence_threshold)
            .map(|t| {
                if (0.0..=1.0).contains(&t) {
                    t
                } else {
                    warn!(
                        threshold = t,
                        "Confidence threshold outside [0, 1], using default"
                    );
                    DEFAULT_CONFIDENCE_THRESHOLD
                }
            })
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);

        let reasoning = ProviderConfig {
            base_url: trim_trailing_slash(
                env("DEEPSEEK_API_BASE")
                    .or_else(|| toml_config.deepseek.base_url.clone())
                    .unwrap_or_else(|| DEFAULT_DEEPSEEK_BASE.to_string()),
            ),
            api_key: first_valid_key(
                env("DEEPSEEK_API_KEY"),
                toml_config.deepseek.api_key.clone(),
            ),
            model: env("DEEPSEEK_MODEL")
                .or_else(|| toml_config.deepseek.model.clone())
                .unwrap_or_else(|| DEFAULT_DEEPSEEK_MODEL.to_string()),
        };

        let vision = ProviderConfig {
            base_url: trim_trailing_slash(
                env("SILICONFLOW_API_BASE")
                    .or_else(|| toml_config.siliconflow.base_url.clone())
                    .unwrap_or_else(|| DEFAULT_SILICONFLOW_BASE.to_string()),
            ),
            api_key: first_valid_key(
                env("SILICONFLOW_API_KEY"),
                toml_config.siliconflow.api_key.clone(),
            ),
            model: toml_config
                .siliconflow
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
        };

        let mineru_key = first_valid_key(env("MINERU_API_KEY"), toml_config.mineru.api_key.clone());
        let mineru = MineruConfig {
            base_url: trim_trailing_slash(
                env("MINERU_URL")
                    .or_else(|| toml_config.mineru.base_url.clone())
                    .unwrap_or_else(|| DEFAULT_MINERU_BASE.to_string()),
            ),
            enabled: toml_config.mineru.enabled.unwrap_or(true) && mineru_key.is_some(),
            api_key: mineru_key,
        };

        let job_defaults = CloudJobConfig::default();
        let cloud_job = CloudJobConfig {
            upload_attempts: toml_config
                .cloud_job
                .upload_attempts
                .filter(|n| *n > 0)
                .unwrap_or(job_defaults.upload_attempts),
            upload_retry_delay: toml_config
                .cloud_job
                .upload_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(job_defaults.upload_retry_delay),
            poll_interval: toml_config
                .cloud_job
                .poll_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(job_defaults.poll_interval),
            max_wait: toml_config
                .cloud_job
                .max_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(job_defaults.max_wait),
        };

        let timeout_defaults = TimeoutConfig::default();
        let timeouts = TimeoutConfig {
            provider_call: toml_config
                .timeouts
                .provider_call_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(timeout_defaults.provider_call),
            generation: toml_config
                .timeouts
                .generation_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(timeout_defaults.generation),
        };

        let manim_service_url = normalize_service_url(
            &env("MANIM_SERVICE_URL")
                .or_else(|| toml_config.manim.service_url.clone())
                .unwrap_or_else(|| DEFAULT_MANIM_URL.to_string()),
        );

        Self {
            bind_address: toml_config
                .bind_address
                .clone()
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            intent: IntentConfig {
                enabled,
                confidence_threshold,
            },
            reasoning,
            vision,
            mineru,
            cloud_job,
            timeouts,
            manim_service_url,
        }
    }

    /// Human-readable warnings about providers that are not configured
    pub fn configuration_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.reasoning.api_key.is_none() {
            warnings.push("DEEPSEEK_API_KEY is missing or still a placeholder".to_string());
        }
        if self.vision.api_key.is_none() {
            warnings.push(
                "SILICONFLOW_API_KEY is missing (vision recognition tier disabled)".to_string(),
            );
        }
        if !self.mineru.enabled {
            warnings.push("MinerU cloud parser disabled (no MINERU_API_KEY)".to_string());
        }
        warnings
    }
}

/// Validate API key (non-empty, not a template placeholder)
pub fn is_valid_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && !key.contains("your_")
}

/// Parse a numeric environment value; garbage is logged and ignored
fn parse_env_value<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, value = %value, "Ignoring unparseable environment value");
            None
        }
    }
}

fn first_valid_key(env_key: Option<String>, toml_key: Option<String>) -> Option<String> {
    env_key
        .filter(|k| is_valid_key(k))
        .or_else(|| toml_key.filter(|k| is_valid_key(k)))
        .map(|k| k.trim().to_string())
}

fn trim_trailing_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Ensure a service URL has a scheme and no trailing slash
pub fn normalize_service_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

// ============================================================================
// TOML loading
// ============================================================================

/// Default configuration file path for the platform
///
/// `<config_dir>/icecream/gateway.toml` (e.g. `~/.config/icecream/gateway.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("icecream").join("gateway.toml"))
}

/// Load the TOML configuration
///
/// An explicitly requested path must exist and parse. When no path is given
/// the platform default is used if present, otherwise an empty config.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                info!("No config file found, using environment and defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded config file: {}", path.display());
    Ok(config)
}
