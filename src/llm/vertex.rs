//! Vertex AI `generateContent` client

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{GenerationConfig, GenerativeModel, LlmError};
use crate::config::ModelConfig;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where bearer tokens come from
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Fixed token, e.g. from `gcloud auth print-access-token`
    Static(String),
    /// GCE/Cloud Run metadata server
    MetadataServer { url: String },
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Client for Gemini models hosted on Vertex AI
pub struct VertexClient {
    http: reqwest::Client,
    project: Option<String>,
    location: String,
    model: String,
    endpoint: Option<String>,
    system_instruction: String,
    generation: GenerationConfig,
    tokens: TokenSource,
    cached: Mutex<Option<CachedToken>>,
}

impl VertexClient {
    pub fn from_config(config: &ModelConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let tokens = match &config.access_token {
            Some(token) => TokenSource::Static(token.clone()),
            None => TokenSource::MetadataServer {
                url: METADATA_TOKEN_URL.to_string(),
            },
        };

        Ok(Self {
            http,
            project: config.project.clone(),
            location: config.location.clone(),
            model: config.model.clone(),
            endpoint: None,
            system_instruction: config.system_instruction.clone(),
            generation: GenerationConfig {
                max_output_tokens: config.max_output_tokens,
                temperature: config.temperature,
            },
            tokens,
            cached: Mutex::new(None),
        })
    }

    /// Override the API host (scheme + authority)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_token_source(mut self, tokens: TokenSource) -> Self {
        self.tokens = tokens;
        *self.cached.lock() = None;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.project.is_some()
    }

    fn url(&self, project: &str) -> String {
        let host = self
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", self.location));
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            host, project, self.location, self.model
        )
    }

    fn cached_token(&self) -> Option<String> {
        self.cached
            .lock()
            .as_ref()
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.token.clone())
    }

    async fn access_token(&self) -> Result<String, LlmError> {
        let url = match &self.tokens {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::MetadataServer { url } => url.clone(),
        };

        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| LlmError::Auth(format!("metadata server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(LlmError::Auth(format!(
                "metadata server returned status {}",
                response.status()
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| LlmError::Auth(format!("bad metadata token response: {}", e)))?;

        // Refresh a minute before expiry
        let ttl = Duration::from_secs(token.expires_in.saturating_sub(60));
        *self.cached.lock() = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });

        Ok(token.access_token)
    }

    async fn generate_content(&self, prompt: &str) -> Result<String, LlmError> {
        let project = self
            .project
            .as_deref()
            .ok_or_else(|| LlmError::NotConfigured("GOOGLE_CLOUD_PROJECT is not set".to_string()))?;

        let token = self.access_token().await?;
        let body = GenerateRequest::new(prompt, &self.system_instruction, self.generation);

        let response = self
            .http
            .post(self.url(project))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => LlmError::Auth(text),
                429 => LlmError::RateLimited(text),
                code => LlmError::Status { status: code, body: text },
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(parsed.text())
    }
}

impl GenerativeModel for VertexClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, LlmError>> {
        Box::pin(self.generate_content(prompt))
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    system_instruction: Content,
    generation_config: WireGenerationConfig,
}

impl GenerateRequest {
    fn new(prompt: &str, system_instruction: &str, generation: GenerationConfig) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(system_instruction.to_string()),
                }],
            },
            generation_config: WireGenerationConfig {
                max_output_tokens: generation.max_output_tokens,
                temperature: generation.temperature,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// Text of the first candidate; empty when the model returned none
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
