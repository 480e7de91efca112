use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::rate_limit::RateLimiter;
use crate::alerts::{AlertChecker, RuleStatus, Slo};
use crate::config::AppConfig;
use crate::llm::{GenerativeModel, LlmError};
use crate::telemetry::MetricEmitter;

pub const API_KEY_HEADER: &str = "x-api-key";
const FORCE_500_PROMPT: &str = "force_500";

/// Application state shared across handlers
pub struct AppState {
    pub config: AppConfig,
    pub model: Arc<dyn GenerativeModel>,
    pub emitter: Arc<MetricEmitter>,
    pub rate_limiter: RateLimiter,
    pub checker: Arc<AlertChecker>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        model: Arc<dyn GenerativeModel>,
        emitter: Arc<MetricEmitter>,
        checker: Arc<AlertChecker>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_rpm);
        Self {
            config,
            model,
            emitter,
            rate_limiter,
            checker,
        }
    }
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Process Metrics
// ============================================================================

#[derive(Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_latency_ms: f64,
    pub model: String,
    pub location: String,
    pub rate_limit_rpm: u32,
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let totals = state.emitter.snapshot();

    Json(MetricsResponse {
        requests_total: totals.requests_total,
        errors_total: totals.errors_total,
        avg_latency_ms: totals.avg_latency_ms,
        model: state.model.model_name().to_string(),
        location: state.config.model.location.clone(),
        rate_limit_rpm: state.config.rate_limit_rpm,
    })
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    #[serde(default, alias = "prompt")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub request_id: String,
    pub model: String,
    pub latency_ms: u64,
    pub answer: String,
}

/// Reasons a chat request fails
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Unauthorized: missing or invalid X-API-Key")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("message cannot be empty")]
    EmptyMessage,

    #[error("Forced 500 for monitor test")]
    Forced,

    #[error(transparent)]
    Upstream(#[from] LlmError),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
            ChatError::Forced => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// `error_type` tag, only set for server-side failures
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            ChatError::Forced => Some("forced"),
            ChatError::Upstream(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Error returned to the caller; server-side details stay in the logs
    fn into_api_error(self, request_id: &str) -> ApiError {
        match self {
            ChatError::Unauthorized => ApiError::Unauthorized(self.to_string()),
            ChatError::RateLimited => ApiError::TooManyRequests(self.to_string()),
            ChatError::EmptyMessage => ApiError::BadRequest(self.to_string()),
            ChatError::Forced => {
                ApiError::Internal(format!("Internal error (request_id={})", request_id))
            }
            ChatError::Upstream(_) => {
                ApiError::Upstream(format!("Upstream model error (request_id={})", request_id))
            }
        }
    }
}

pub async fn chat_post(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Option<Json<ChatRequest>>,
) -> Response {
    // Malformed bodies are treated as an empty message so they are counted
    let message = payload.and_then(|Json(request)| request.message);
    handle_chat(&state, &headers, connect_info, message).await
}

pub async fn chat_get(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    query: Option<Query<ChatQuery>>,
) -> Response {
    let message = query.and_then(|Query(query)| query.message);
    handle_chat(&state, &headers, connect_info, message).await
}

async fn handle_chat(
    state: &AppState,
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    message: Option<String>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let start = Instant::now();
    let client_ip = client_ip(headers, connect_info.as_ref());
    let model = state.model.model_name().to_string();

    state.emitter.record_request();

    let result = generate(state, headers, &client_ip, message).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(answer) => {
            state.emitter.record_success(latency_ms);
            tracing::info!(
                request_id = %request_id,
                latency_ms,
                model = %model,
                client_ip = %client_ip,
                "chat_ok"
            );
            state.emitter.forward_log(
                "chat_ok",
                "info",
                serde_json::json!({
                    "request_id": request_id,
                    "latency_ms": latency_ms,
                    "model": model,
                    "location": state.config.model.location,
                    "client_ip": client_ip,
                }),
            );

            Json(ChatResponse {
                request_id,
                model,
                latency_ms,
                answer,
            })
            .into_response()
        }
        Err(err) => {
            let status = err.status();
            let error_type = err.error_type();
            state.emitter.record_error(latency_ms, status.as_u16(), error_type);

            let event = if error_type.is_some() {
                tracing::error!(
                    request_id = %request_id,
                    latency_ms,
                    error_type = error_type.unwrap_or_default(),
                    error = %err,
                    "chat_error"
                );
                "chat_error"
            } else {
                tracing::warn!(
                    request_id = %request_id,
                    latency_ms,
                    http_status = status.as_u16(),
                    detail = %err,
                    "chat_http_error"
                );
                "chat_http_error"
            };
            state.emitter.forward_log(
                event,
                "error",
                serde_json::json!({
                    "request_id": request_id,
                    "latency_ms": latency_ms,
                    "model": model,
                    "location": state.config.model.location,
                    "client_ip": client_ip,
                    "http_status": status.as_u16(),
                    "error_type": error_type,
                    "error": err.to_string(),
                }),
            );

            err.into_api_error(&request_id)
                .with_request_id(request_id)
                .into_response()
        }
    }
}

async fn generate(
    state: &AppState,
    headers: &HeaderMap,
    client_ip: &str,
    message: Option<String>,
) -> Result<String, ChatError> {
    if let Some(expected) = state.config.app_api_key.as_deref() {
        let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(ChatError::Unauthorized);
        }
    }

    if !state.rate_limiter.check(client_ip) {
        return Err(ChatError::RateLimited);
    }

    let prompt = message.as_deref().map(str::trim).unwrap_or_default();
    if prompt.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    if prompt == FORCE_500_PROMPT {
        return Err(ChatError::Forced);
    }

    let answer = state.model.generate(prompt).await?;

    if state.config.slow_ms > 0 {
        tokio::time::sleep(Duration::from_millis(state.config.slow_ms)).await;
    }

    Ok(answer)
}

/// First `X-Forwarded-For` entry, else the peer address
pub fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    match (forwarded, connect_info) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(ConnectInfo(addr))) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Serialize)]
pub struct AlertsResponse {
    pub rules: Vec<RuleStatus>,
    pub slos: Vec<Slo>,
}

pub async fn list_alerts(State(state): State<Arc<AppState>>) -> Json<AlertsResponse> {
    Json(AlertsResponse {
        rules: state.checker.statuses(),
        slos: state.checker.slos(),
    })
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RuleStatus>, ApiError> {
    state
        .checker
        .status(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Alert rule '{}' not found", name)))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    TooManyRequests(String),
    Internal(String),
    Upstream(String),
    WithRequestId(Box<ApiError>, String),
}

impl ApiError {
    pub fn with_request_id(self, request_id: String) -> Self {
        ApiError::WithRequestId(Box::new(self), request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (error, request_id) = match self {
            ApiError::WithRequestId(inner, id) => (*inner, Some(id)),
            other => (other, None),
        };

        let (status, message) = match error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::WithRequestId(inner, _) => return inner.into_response(),
        };

        let mut body = serde_json::json!({
            "error": message
        });
        if let Some(id) = request_id {
            body["request_id"] = serde_json::Value::String(id);
        }

        (status, Json(body)).into_response()
    }
}
