//! Datadog HTTP intake client
//!
//! Submits metric series and log lines, and manages monitors for the
//! exported rule set.

use std::time::Duration;

use serde::Serialize;

use super::store::SeriesKind;
use crate::config::DatadogConfig;

/// One metric point in the v1 series payload
#[derive(Debug, Clone, Serialize)]
pub struct SeriesPoint {
    pub metric: String,
    pub points: Vec<(i64, f64)>,
    #[serde(rename = "type")]
    pub metric_type: &'static str,
    pub tags: Vec<String>,
}

impl SeriesPoint {
    pub fn new(
        metric: &str,
        kind: SeriesKind,
        timestamp_secs: i64,
        value: f64,
        tags: Vec<String>,
    ) -> Self {
        Self {
            metric: metric.to_string(),
            points: vec![(timestamp_secs, value)],
            metric_type: kind.datadog_type(),
            tags,
        }
    }
}

#[derive(Serialize)]
struct SeriesPayload<'a> {
    series: &'a [SeriesPoint],
}

/// Client for the Datadog API
#[derive(Debug, Clone)]
pub struct DatadogClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    app_key: Option<String>,
    env: String,
    service: String,
}

impl DatadogClient {
    /// Create a client, or `None` when no API key is configured
    pub fn from_config(config: &DatadogConfig) -> Result<Option<Self>, DatadogError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DatadogError::Client(e.to_string()))?;

        Ok(Some(Self {
            http,
            api_base: config.api_base(),
            api_key,
            app_key: config.app_key.clone(),
            env: config.env.clone(),
            service: config.service.clone(),
        }))
    }

    /// Point the client at a different API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Submit metric points to `/api/v1/series`
    pub async fn submit_series(&self, series: &[SeriesPoint]) -> Result<(), DatadogError> {
        let url = format!("{}/api/v1/series", self.api_base);
        self.post(&url, &SeriesPayload { series }, false).await.map(|_| ())
    }

    /// Submit a log line to `/api/v2/logs`
    pub async fn submit_log(
        &self,
        message: &str,
        status: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), DatadogError> {
        let mut entry = serde_json::Map::new();
        entry.insert("message".into(), message.into());
        entry.insert("ddsource".into(), "rust".into());
        entry.insert("service".into(), self.service.clone().into());
        entry.insert("status".into(), status.into());
        entry.insert(
            "ddtags".into(),
            format!("env:{},service:{}", self.env, self.service).into(),
        );
        entry.extend(extra);

        let url = format!("{}/api/v2/logs", self.api_base);
        let body = serde_json::Value::Array(vec![serde_json::Value::Object(entry)]);
        self.post(&url, &body, false).await.map(|_| ())
    }

    /// Create a monitor from a payload built by `AlertRule::to_monitor_payload`
    pub async fn create_monitor(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, DatadogError> {
        let url = format!("{}/api/v1/monitor", self.api_base);
        self.post(&url, payload, true).await
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        needs_app_key: bool,
    ) -> Result<serde_json::Value, DatadogError> {
        let mut request = self
            .http
            .post(url)
            .header("DD-API-KEY", &self.api_key)
            .json(body);

        if needs_app_key {
            let app_key = self.app_key.as_ref().ok_or(DatadogError::MissingAppKey)?;
            request = request.header("DD-APPLICATION-KEY", app_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DatadogError::Network(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(DatadogError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}

/// Datadog client errors
#[derive(Debug, thiserror::Error)]
pub enum DatadogError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Datadog rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("DD_APP_KEY is required for this endpoint")]
    MissingAppKey,
}
