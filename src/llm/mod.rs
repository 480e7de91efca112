//! Managed generative model backends

pub mod vertex;

use futures::future::BoxFuture;

pub use vertex::{TokenSource, VertexClient};

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 256,
            temperature: 0.2,
        }
    }
}

/// A text generation backend
pub trait GenerativeModel: Send + Sync {
    /// Model identifier reported to callers
    fn model_name(&self) -> &str;

    /// Generate a completion for a single prompt
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, LlmError>>;
}

/// Model call failures
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Model not configured: {0}")]
    NotConfigured(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited or quota exhausted: {0}")]
    RateLimited(String),

    #[error("Upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Short label used for the `error_type` metric tag
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::NotConfigured(_) => "not_configured",
            LlmError::Auth(_) => "auth",
            LlmError::RateLimited(_) => "rate_limited",
            LlmError::Status { .. } => "upstream_status",
            LlmError::Network(_) => "network",
            LlmError::InvalidResponse(_) => "invalid_response",
        }
    }
}
