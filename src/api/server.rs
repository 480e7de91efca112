use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{chat_get, chat_post, get_alert, health_check, list_alerts, metrics, AppState};
use crate::alerts::{load_rule_set, AlertChecker, Notifier, NotifyTarget};
use crate::config::AppConfig;
use crate::llm::{GenerativeModel, VertexClient};
use crate::telemetry::{DatadogClient, MetricEmitter, MetricStore};

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Chat
        .route("/chat", get(chat_get).post(chat_post))
        // Process totals
        .route("/metrics", get(metrics))
        // Alert states
        .route("/alerts", get(list_alerts))
        .route("/alerts/:name", get(get_alert))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MetricStore::new());

    let datadog = DatadogClient::from_config(&config.datadog)?.map(Arc::new);
    if datadog.is_some() {
        tracing::info!(site = %config.datadog.site, "Datadog submission enabled");
    } else {
        tracing::info!("DD_API_KEY not set, metrics stay in-process");
    }
    let emitter = Arc::new(MetricEmitter::new(
        &config.datadog,
        Arc::clone(&store),
        datadog,
    ));

    let vertex = VertexClient::from_config(&config.model)?;
    if vertex.is_configured() {
        tracing::info!(
            model = %config.model.model,
            location = %config.model.location,
            "startup_ok"
        );
    } else {
        tracing::warn!("startup_warning: missing GOOGLE_CLOUD_PROJECT, chat requests will fail");
    }
    let model: Arc<dyn GenerativeModel> = Arc::new(vertex);

    let rules = load_rule_set(&config.alerts, emitter.names(), &config.datadog.service)?.compile()?;
    tracing::info!(rules = rules.rules.len(), slos = rules.slos.len(), "Alert rules loaded");

    let mut targets = vec![NotifyTarget::Log];
    if let Some(url) = &config.alerts.webhook_url {
        targets.push(NotifyTarget::Webhook {
            url: url.clone(),
            headers: Default::default(),
        });
    }
    let checker = Arc::new(AlertChecker::new(
        rules,
        Arc::clone(&store),
        Notifier::new(targets),
    ));
    let checker_handle = Arc::clone(&checker).start(Duration::from_secs(
        config.alerts.check_interval_secs.max(1),
    ));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = Arc::new(AppState::new(config, model, emitter, Arc::clone(&checker)));
    let pruner_handle = spawn_rate_limit_pruner(Arc::clone(&state), RATE_LIMIT_PRUNE_INTERVAL);
    let app = build_router(state);

    tracing::info!("Starting dd-gemini-app on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&checker)))
        .await?;

    checker_handle.abort();
    pruner_handle.abort();

    tracing::info!("dd-gemini-app stopped");
    Ok(())
}

/// Periodically drop rate limit windows for clients that went quiet
fn spawn_rate_limit_pruner(state: Arc<AppState>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let pruned = state.rate_limiter.prune();
            if pruned > 0 {
                tracing::debug!(
                    pruned,
                    tracked = state.rate_limiter.tracked_clients(),
                    "Pruned idle rate limit windows"
                );
            }
        }
    })
}

async fn shutdown_signal(checker: Arc<AlertChecker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown signal received, stopping alert checker...");
    checker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::builtin_rule_set;
    use crate::llm::LlmError;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::future::BoxFuture;
    use tower::util::ServiceExt;

    struct FakeModel {
        fail: bool,
    }

    impl GenerativeModel for FakeModel {
        fn model_name(&self) -> &str {
            "fake-model"
        }

        fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, LlmError>> {
            Box::pin(async move {
                if self.fail {
                    Err(LlmError::RateLimited("quota exhausted".to_string()))
                } else {
                    Ok(format!("echo: {}", prompt))
                }
            })
        }
    }

    fn test_config(pairs: &[(&str, &str)]) -> AppConfig {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    fn create_state(pairs: &[(&str, &str)], fail: bool) -> Arc<AppState> {
        let config = test_config(pairs);
        let store = Arc::new(MetricStore::new());
        let emitter = Arc::new(MetricEmitter::new(&config.datadog, Arc::clone(&store), None));
        let rules = builtin_rule_set(emitter.names(), &config.datadog.service)
            .compile()
            .unwrap();
        let checker = Arc::new(AlertChecker::new(rules, store, Notifier::default()));
        Arc::new(AppState::new(
            config,
            Arc::new(FakeModel { fail }),
            emitter,
            checker,
        ))
    }

    fn create_test_app() -> Router {
        build_router(create_state(&[], false))
    }

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["ok"], true);
    }

    #[tokio::test]
    async fn test_chat_success() {
        let state = create_state(&[], false);
        let app = build_router(Arc::clone(&state));

        let response = app
            .oneshot(chat_request(serde_json::json!({"message": "  hello  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["answer"], "echo: hello");
        assert_eq!(body["model"], "fake-model");
        assert!(body["request_id"].as_str().is_some());
        assert!(body["latency_ms"].is_u64());

        let totals = state.emitter.snapshot();
        assert_eq!(totals.requests_total, 1);
        assert_eq!(totals.errors_total, 0);
    }

    #[tokio::test]
    async fn test_chat_get_with_prompt_alias() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/chat?prompt=hi%20there")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["answer"], "echo: hi there");
    }

    #[tokio::test]
    async fn test_chat_error_paths_are_counted() {
        let state = create_state(&[], false);
        let app = build_router(Arc::clone(&state));

        let cases = [
            (serde_json::json!({"message": "   "}), StatusCode::BAD_REQUEST),
            (serde_json::json!({}), StatusCode::BAD_REQUEST),
            (serde_json::json!({"message": "force_500"}), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (body, expected) in cases {
            let response = app.clone().oneshot(chat_request(body)).await.unwrap();
            assert_eq!(response.status(), expected);
            let body = json_body(response).await;
            assert!(body["error"].as_str().is_some());
            assert!(body["request_id"].as_str().is_some());
        }

        // Not JSON at all
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let totals = state.emitter.snapshot();
        assert_eq!(totals.requests_total, 4);
        assert_eq!(totals.errors_total, 4);
    }

    #[tokio::test]
    async fn test_api_key_required() {
        let state = create_state(&[("APP_API_KEY", "secret")], false);
        let app = build_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(chat_request(serde_json::json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat")
                    .header("content-type", "application/json")
                    .header("X-API-Key", "secret")
                    .body(Body::from(r#"{"message": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.emitter.snapshot().errors_total, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_per_forwarded_ip() {
        let state = create_state(&[("RATE_LIMIT_RPM", "2")], false);
        let app = build_router(Arc::clone(&state));

        let request = |ip: &str| {
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header("content-type", "application/json")
                .header("x-forwarded-for", format!("{}, 10.0.0.254", ip))
                .body(Body::from(r#"{"message": "hi"}"#))
                .unwrap()
        };

        for _ in 0..2 {
            let response = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.oneshot(request("10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(state.emitter.snapshot().errors_total, 1);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let state = create_state(&[], true);
        let app = build_router(Arc::clone(&state));

        let response = app
            .oneshot(chat_request(serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        let error = body["error"].as_str().unwrap();
        assert!(!error.contains("quota"), "upstream detail leaked: {}", error);
        assert_eq!(state.emitter.snapshot().errors_total, 1);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = create_state(&[], false);
        let app = build_router(Arc::clone(&state));

        app.clone()
            .oneshot(chat_request(serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["requests_total"], 1);
        assert_eq!(body["errors_total"], 0);
        assert_eq!(body["model"], "fake-model");
        assert_eq!(body["location"], "us-central1");
        assert_eq!(body["rate_limit_rpm"], 30);
    }

    #[tokio::test]
    async fn test_alerts_endpoint() {
        let state = create_state(&[], false);
        let now = chrono::Utc::now().timestamp_millis();
        // Right after startup there is no full window yet
        state.checker.evaluate(now);
        assert_eq!(
            state.checker.status("LLM_Traffic_Stopped").unwrap().state,
            crate::alerts::AlertState::Ok
        );
        state.checker.evaluate(now + 5 * 60_000 + 1_000);
        let app = build_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/alerts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["rules"].as_array().unwrap().len(), 5);
        assert_eq!(body["slos"][0]["id"], "chat-availability");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/alerts/LLM_Traffic_Stopped")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["state"], "ALERT");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/alerts/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
