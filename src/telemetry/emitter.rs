//! Per-request metric emission
//!
//! Every chat request records into three places: the process totals served by
//! `/metrics`, the in-process [`MetricStore`] read by the alert checker, and
//! Datadog when an API key is configured.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::datadog::{DatadogClient, SeriesPoint};
use super::store::{MetricStore, SeriesKind};
use crate::config::DatadogConfig;

pub const REQUESTS_TOTAL: &str = "requests_total";
pub const CHAT_SUCCESS_TOTAL: &str = "chat_success_total";
pub const CHAT_ERROR_TOTAL: &str = "chat_error_total";
pub const LATENCY_MS: &str = "latency_ms";

/// Fully qualified metric names for a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNames {
    pub requests_total: String,
    pub chat_success_total: String,
    pub chat_error_total: String,
    pub latency_ms: String,
}

impl MetricNames {
    pub fn new(namespace: &str) -> Self {
        let qualify = |name: &str| {
            if namespace.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", namespace, name)
            }
        };
        Self {
            requests_total: qualify(REQUESTS_TOTAL),
            chat_success_total: qualify(CHAT_SUCCESS_TOTAL),
            chat_error_total: qualify(CHAT_ERROR_TOTAL),
            latency_ms: qualify(LATENCY_MS),
        }
    }
}

/// Point-in-time view of the process totals
#[derive(Debug, Clone, Serialize)]
pub struct TotalsSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Default)]
struct Totals {
    requests: AtomicU64,
    errors: AtomicU64,
    latency_ms: AtomicU64,
    timed: AtomicU64,
}

/// Records request, error and latency metrics
pub struct MetricEmitter {
    names: MetricNames,
    base_tags: Vec<String>,
    store: Arc<MetricStore>,
    datadog: Option<Arc<DatadogClient>>,
    totals: Totals,
}

impl MetricEmitter {
    pub fn new(
        config: &DatadogConfig,
        store: Arc<MetricStore>,
        datadog: Option<Arc<DatadogClient>>,
    ) -> Self {
        let names = MetricNames::new(&config.metric_namespace);

        store.register_counter(&names.requests_total);
        store.register_counter(&names.chat_success_total);
        store.register_counter(&names.chat_error_total);

        Self {
            names,
            base_tags: config.base_tags(),
            store,
            datadog,
            totals: Totals::default(),
        }
    }

    pub fn names(&self) -> &MetricNames {
        &self.names
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Count an incoming chat request
    pub fn record_request(&self) {
        self.totals.requests.fetch_add(1, Ordering::Relaxed);
        self.emit(&self.names.requests_total, SeriesKind::Counter, 1.0, &["endpoint:chat"]);
    }

    /// Record a successful completion
    pub fn record_success(&self, latency_ms: u64) {
        self.add_latency(latency_ms);

        self.emit(
            &self.names.latency_ms,
            SeriesKind::Gauge,
            latency_ms as f64,
            &["endpoint:chat", "status:ok"],
        );
        self.emit(&self.names.chat_success_total, SeriesKind::Counter, 1.0, &["endpoint:chat"]);
    }

    /// Record a failed request with its HTTP status and, for server errors, its type
    pub fn record_error(&self, latency_ms: u64, code: u16, error_type: Option<&str>) {
        self.add_latency(latency_ms);
        self.totals.errors.fetch_add(1, Ordering::Relaxed);

        let code_tag = format!("code:{}", code);
        self.emit(
            &self.names.latency_ms,
            SeriesKind::Gauge,
            latency_ms as f64,
            &["endpoint:chat", "status:error", code_tag.as_str()],
        );

        let error_tag = error_type.map(|t| format!("error_type:{}", t));
        let mut tags = vec!["endpoint:chat", code_tag.as_str()];
        if let Some(tag) = error_tag.as_deref() {
            tags.push(tag);
        }
        self.emit(&self.names.chat_error_total, SeriesKind::Counter, 1.0, &tags);
    }

    /// Forward a structured log line to Datadog, if configured
    pub fn forward_log(&self, event: &str, status: &str, fields: serde_json::Value) {
        let Some(client) = self.datadog.clone() else {
            return;
        };
        let extra = match fields {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let event = event.to_string();
        let status = status.to_string();

        tokio::spawn(async move {
            if let Err(e) = client.submit_log(&event, &status, extra).await {
                tracing::debug!(error = %e, "Failed to forward log to Datadog");
            }
        });
    }

    pub fn snapshot(&self) -> TotalsSnapshot {
        let requests = self.totals.requests.load(Ordering::Relaxed);
        let timed = self.totals.timed.load(Ordering::Relaxed);
        let latency = self.totals.latency_ms.load(Ordering::Relaxed);

        let avg_latency_ms = if timed > 0 {
            (latency as f64 / timed as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };

        TotalsSnapshot {
            requests_total: requests,
            errors_total: self.totals.errors.load(Ordering::Relaxed),
            avg_latency_ms,
        }
    }

    fn add_latency(&self, latency_ms: u64) {
        self.totals.latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.totals.timed.fetch_add(1, Ordering::Relaxed);
    }

    fn emit(&self, name: &str, kind: SeriesKind, value: f64, extra_tags: &[&str]) {
        let mut tags: Vec<String> = extra_tags.iter().map(|t| t.to_string()).collect();
        tags.extend(self.base_tags.iter().cloned());

        let now = chrono::Utc::now();
        self.store.record(name, kind, now.timestamp_millis(), value, &tags);

        if let Some(client) = self.datadog.clone() {
            let point = SeriesPoint::new(name, kind, now.timestamp(), value, tags);
            tokio::spawn(async move {
                if let Err(e) = client.submit_series(&[point]).await {
                    tracing::debug!(error = %e, "Failed to submit metric to Datadog");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::store::Aggregation;

    fn test_emitter() -> MetricEmitter {
        let config = DatadogConfig {
            api_key: None,
            app_key: None,
            site: "datadoghq.com".to_string(),
            env: "test".to_string(),
            service: "svc".to_string(),
            metric_namespace: "dd_gemini".to_string(),
        };
        MetricEmitter::new(&config, Arc::new(MetricStore::new()), None)
    }

    fn sum_last_minute(emitter: &MetricEmitter, name: &str, scope: &[&str]) -> Option<f64> {
        let now = chrono::Utc::now().timestamp_millis();
        let scope: Vec<String> = scope.iter().map(|s| s.to_string()).collect();
        emitter
            .store()
            .aggregate(name, &scope, Aggregation::Sum, now - 60_000, now + 1_000)
    }

    #[test]
    fn test_metric_names() {
        let names = MetricNames::new("dd_gemini");
        assert_eq!(names.requests_total, "dd_gemini.requests_total");
        assert_eq!(names.chat_error_total, "dd_gemini.chat_error_total");
        assert_eq!(MetricNames::new("").latency_ms, "latency_ms");
    }

    #[test]
    fn test_counters_registered_at_startup() {
        let emitter = test_emitter();
        let names = emitter.names().clone();
        // The last minute reaches back before the emitter existed
        assert_eq!(sum_last_minute(&emitter, &names.requests_total, &[]), None);

        let now = chrono::Utc::now().timestamp_millis();
        for name in [&names.requests_total, &names.chat_success_total, &names.chat_error_total] {
            let sum = emitter
                .store()
                .aggregate(name, &[], Aggregation::Sum, now, now + 60_000);
            assert_eq!(sum, Some(0.0), "{}", name);
        }
    }

    #[test]
    fn test_success_and_error_recording() {
        let emitter = test_emitter();
        let names = emitter.names().clone();

        emitter.record_request();
        emitter.record_success(100);
        emitter.record_request();
        emitter.record_error(300, 502, Some("upstream"));

        let snapshot = emitter.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.errors_total, 1);
        assert_eq!(snapshot.avg_latency_ms, 200.0);

        assert_eq!(
            sum_last_minute(&emitter, &names.requests_total, &["service:svc", "env:test"]),
            Some(2.0)
        );
        assert_eq!(sum_last_minute(&emitter, &names.chat_success_total, &[]), Some(1.0));
        assert_eq!(
            sum_last_minute(
                &emitter,
                &names.chat_error_total,
                &["code:502", "error_type:upstream"],
            ),
            Some(1.0)
        );
    }
}
