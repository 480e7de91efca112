//! dd-gemini-app: Gemini Chat Service with Datadog Observability
//!
//! A small HTTP service that forwards prompts to a Gemini model on Vertex AI
//! and reports every request to Datadog, with the monitors that watch it
//! evaluated in-process as well.
//!
//! # Features
//!
//! - **Chat API**: `POST /chat` and `GET /chat` with API key gate and per-IP rate limiting
//! - **Telemetry**: request, success, error and latency metrics plus structured logs
//! - **Alert Rules**: Datadog monitor syntax for threshold, burn-rate and error-budget rules
//! - **Local Evaluation**: OK / WARN / ALERT / NO_DATA state machine with recovery notifications
//! - **Monitor Export**: the same rules rendered as Datadog monitor payloads
//!
//! # Example
//!
//! ```no_run
//! use dd_gemini_app::alerts::{builtin_rule_set, AlertChecker, Notifier};
//! use dd_gemini_app::telemetry::{MetricNames, MetricStore};
//! use std::sync::Arc;
//!
//! let names = MetricNames::new("dd_gemini");
//! let store = Arc::new(MetricStore::new());
//! store.register_counter(&names.requests_total);
//!
//! let rules = builtin_rule_set(&names, "dd-gemini-app").compile().unwrap();
//! let checker = AlertChecker::new(rules, store, Notifier::default());
//!
//! for n in checker.evaluate(chrono::Utc::now().timestamp_millis()) {
//!     println!("{}: {}", n.rule, n.message);
//! }
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod llm;
pub mod telemetry;

// Re-export commonly used types
pub use alerts::{AlertChecker, AlertState, RuleSet};
pub use config::{AppConfig, ConfigError};
pub use llm::{GenerativeModel, LlmError};
