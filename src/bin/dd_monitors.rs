//! Export alert rules as Datadog monitors
//!
//! Usage: dd_monitors [apply]
//!
//! Without arguments the monitor payloads are printed as JSON. With `apply`
//! each one is created through the Datadog monitor API, which needs both
//! DD_API_KEY and DD_APP_KEY. Rules come from ALERT_RULES_PATH when set,
//! otherwise the built-in catalog.

use dd_gemini_app::alerts::load_rule_set;
use dd_gemini_app::config::AppConfig;
use dd_gemini_app::telemetry::{DatadogClient, MetricNames};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dd_monitors=info,dd_gemini_app=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let apply = std::env::args().nth(1).as_deref() == Some("apply");
    let config = AppConfig::from_env()?;

    let names = MetricNames::new(&config.datadog.metric_namespace);
    let rule_set = load_rule_set(&config.alerts, &names, &config.datadog.service)?;
    // Refuse to export anything the local checker would reject
    rule_set.compile()?;

    let payloads: Vec<serde_json::Value> = rule_set
        .rules
        .iter()
        .map(|rule| rule.to_monitor_payload())
        .collect();

    if !apply {
        println!("{}", serde_json::to_string_pretty(&payloads)?);
        return Ok(());
    }

    let client = DatadogClient::from_config(&config.datadog)?
        .ok_or("DD_API_KEY is required to create monitors")?;

    let mut failed = 0;
    for payload in &payloads {
        let name = payload["name"].as_str().unwrap_or("?");
        match client.create_monitor(payload).await {
            Ok(created) => {
                tracing::info!(monitor = %name, id = %created["id"], "Monitor created");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(monitor = %name, error = %e, "Failed to create monitor");
            }
        }
    }

    println!("Created {} of {} monitors", payloads.len() - failed, payloads.len());
    if failed > 0 {
        return Err(format!("{} monitor(s) failed", failed).into());
    }
    Ok(())
}
