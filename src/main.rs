//! dd-gemini-app server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - HOST / PORT: Bind address (default: 0.0.0.0:8080)
//! - GOOGLE_CLOUD_PROJECT, GOOGLE_CLOUD_LOCATION, GEMINI_MODEL: Vertex AI model
//! - GOOGLE_ACCESS_TOKEN: Static bearer token (default: metadata server)
//! - APP_API_KEY: Required X-API-Key value (default: no gate)
//! - RATE_LIMIT_RPM: Per-client requests per minute, 0 disables (default: 30)
//! - DD_API_KEY, DD_SITE, DD_ENV, DD_SERVICE: Datadog submission
//! - ALERT_RULES_PATH, ALERT_CHECK_INTERVAL_SECS, ALERT_WEBHOOK_URL: Local alerting
//! - RUST_LOG: Log level (default: info)

use dd_gemini_app::api::run_server;
use dd_gemini_app::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dd_gemini_app=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("dd-gemini-app configuration:");
    tracing::info!("  Listen: {}:{}", config.host, config.port);
    tracing::info!(
        "  Model: {} ({}, project {})",
        config.model.model,
        config.model.location,
        config.model.project.as_deref().unwrap_or("<unset>")
    );
    tracing::info!(
        "  API key gate: {}",
        if config.app_api_key.is_some() { "enabled" } else { "disabled" }
    );
    tracing::info!("  Rate limit: {} requests/minute per client", config.rate_limit_rpm);
    if config.slow_ms > 0 {
        tracing::info!("  Injected latency: {} ms", config.slow_ms);
    }
    tracing::info!(
        "  Datadog: {} (service {}, env {})",
        if config.datadog.api_key.is_some() { config.datadog.site.as_str() } else { "disabled" },
        config.datadog.service,
        config.datadog.env
    );
    tracing::info!(
        "  Alert check interval: {} seconds",
        config.alerts.check_interval_secs
    );
    match &config.alerts.rules_path {
        Some(path) => tracing::info!("  Alert rules: {}", path.display()),
        None => tracing::info!("  Alert rules: built-in catalog"),
    }

    run_server(config).await
}
