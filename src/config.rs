//! Service configuration
//!
//! Everything is read from environment variables. Unset or empty variables
//! fall back to defaults; numeric variables that fail to parse are rejected.

use std::path::PathBuf;

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are dd-gemini-app: a production-style Gemini (Vertex AI) API demo for observability. \
Answer concisely and practically. If asked what you do, say you provide Gemini responses \
and return model + latency for monitoring. Do not claim to be 'trained by Google' or describe yourself as a generic LLM.";

/// Top-level configuration for the chat service
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// API key required in `X-API-Key`; no gate when unset
    pub app_api_key: Option<String>,
    /// Per-client requests allowed per minute (0 disables limiting)
    pub rate_limit_rpm: u32,
    /// Latency injected after each model call
    pub slow_ms: u64,
    pub model: ModelConfig,
    pub datadog: DatadogConfig,
    pub alerts: AlertSettings,
}

/// Vertex AI model settings
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub project: Option<String>,
    pub location: String,
    pub model: String,
    /// Static bearer token; the metadata server is used when unset
    pub access_token: Option<String>,
    pub system_instruction: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// Datadog intake settings
#[derive(Debug, Clone)]
pub struct DatadogConfig {
    pub api_key: Option<String>,
    /// Needed only for the monitor API
    pub app_key: Option<String>,
    pub site: String,
    pub env: String,
    pub service: String,
    pub metric_namespace: String,
}

impl DatadogConfig {
    /// Base URL of the Datadog API for the configured site
    pub fn api_base(&self) -> String {
        let site = self
            .site
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("https://api.{}", site)
    }

    /// Tags attached to every metric and log line
    pub fn base_tags(&self) -> Vec<String> {
        vec![
            format!("env:{}", self.env),
            format!("service:{}", self.service),
        ]
    }
}

/// Local alert evaluation settings
#[derive(Debug, Clone)]
pub struct AlertSettings {
    /// JSON rule set replacing the built-in catalog
    pub rules_path: Option<PathBuf>,
    pub check_interval_secs: u64,
    pub webhook_url: Option<String>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            rules_path: None,
            check_interval_secs: 60,
            webhook_url: None,
        }
    }
}

impl AppConfig {
    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let model = ModelConfig {
            project: get("GOOGLE_CLOUD_PROJECT"),
            location: get("GOOGLE_CLOUD_LOCATION").unwrap_or_else(|| "us-central1".to_string()),
            model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            access_token: get("GOOGLE_ACCESS_TOKEN"),
            system_instruction: get("SYSTEM_INSTRUCTION")
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            max_output_tokens: parse_or(&get, "MAX_OUTPUT_TOKENS", 256)?,
            temperature: parse_or(&get, "TEMPERATURE", 0.2)?,
        };

        let datadog = DatadogConfig {
            api_key: get("DD_API_KEY"),
            app_key: get("DD_APP_KEY").or_else(|| get("DD_APPLICATION_KEY")),
            site: get("DD_SITE").unwrap_or_else(|| "us5.datadoghq.com".to_string()),
            env: get("DD_ENV").unwrap_or_else(|| "prod".to_string()),
            service: get("DD_SERVICE").unwrap_or_else(|| "dd-gemini-app".to_string()),
            metric_namespace: get("DD_METRIC_NAMESPACE").unwrap_or_else(|| "dd_gemini".to_string()),
        };

        let alerts = AlertSettings {
            rules_path: get("ALERT_RULES_PATH").map(PathBuf::from),
            check_interval_secs: parse_or(&get, "ALERT_CHECK_INTERVAL_SECS", 60)?,
            webhook_url: get("ALERT_WEBHOOK_URL"),
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            app_api_key: get("APP_API_KEY"),
            rate_limit_rpm: parse_or(&get, "RATE_LIMIT_RPM", 30)?,
            slow_ms: parse_or(&get, "SLOW_MS", 0)?,
            model,
            datadog,
            alerts,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}
