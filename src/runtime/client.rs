//! Blocking-style request/response client for the local model runtime.
//!
//! Thin capability over the runtime's HTTP API: generation and
//! model-presence probing. No retry lives here; retry policy belongs to
//! the model slot. Every call honors a caller-supplied deadline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::config::CoreConfig;
use crate::error::{ConfigError, RuntimeError};

/// Maximum bytes of an error body kept in an error message.
const ERROR_BODY_EXCERPT: usize = 200;

/// A single generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Model identifier.
    pub model: String,
    /// Fully assembled prompt.
    pub prompt: String,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
    /// Context window to request.
    pub num_ctx: u32,
    /// Maximum tokens to generate.
    pub num_predict: u32,
}

/// Capability boundary to the external model runtime.
///
/// Implementations handle transport for one runtime while presenting a
/// uniform, deadline-bearing interface to the slot and the agents.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Runtime name for logging (e.g. `"ollama"`).
    fn name(&self) -> &'static str;

    /// Executes a generation request, returning the raw response text.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] on transport failure, model absence,
    /// deadline expiry, or any other runtime-side error.
    async fn generate(
        &self,
        request: &GenerateRequest,
        deadline: Instant,
    ) -> Result<String, RuntimeError>;

    /// Probes the runtime for the presence of `model`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ModelAbsent`] when the model is not
    /// installed, or a transport-level [`RuntimeError`] otherwise.
    async fn ensure_present(&self, model: &str, deadline: Instant) -> Result<(), RuntimeError>;

    /// Lists the models installed in the runtime.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`RuntimeError`] on failure.
    async fn list_models(&self, deadline: Instant) -> Result<Vec<String>, RuntimeError>;

    /// Requests an unload of `model`. Best-effort: failures are logged
    /// and swallowed so shutdown is never blocked.
    async fn unload(&self, model: &str);
}

#[derive(Serialize)]
struct ApiGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
    keep_alive: u32,
}

#[derive(Serialize)]
struct ApiOptions {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ApiGenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct ApiTagsResponse {
    models: Vec<ApiModel>,
}

#[derive(Deserialize)]
struct ApiModel {
    name: String,
}

/// HTTP client for an Ollama-compatible runtime.
///
/// `keep_alive` is pinned to zero and sent on every generation call so
/// the runtime releases the model immediately afterwards; residency
/// policy is owned entirely by the slot, never by runtime defaults.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    keep_alive: u32,
}

impl OllamaClient {
    /// Creates a client against the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the HTTP client cannot be built.
    pub fn new(config: &CoreConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "ollama_base_url",
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            keep_alive: 0,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

fn classify(error: reqwest::Error) -> RuntimeError {
    if error.is_timeout() {
        RuntimeError::Timeout
    } else if let Some(status) = error.status() {
        RuntimeError::Api {
            status: status.as_u16(),
            message: error.to_string(),
        }
    } else {
        RuntimeError::Unavailable {
            message: error.to_string(),
        }
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_BODY_EXCERPT).collect()
}

/// Whether an installed model name satisfies a requested identifier.
/// Ollama tags names (`llama3.1:8b`); an untagged request matches any
/// tag of the same base name.
fn model_matches(installed: &str, requested: &str) -> bool {
    installed == requested || installed.split(':').next() == Some(requested)
}

#[async_trait]
impl ModelRuntime for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        deadline: Instant,
    ) -> Result<String, RuntimeError> {
        let body = ApiGenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: Some(ApiOptions {
                temperature: request.temperature,
                num_ctx: request.num_ctx,
                num_predict: request.num_predict,
            }),
            keep_alive: self.keep_alive,
        };

        let call = async {
            let response = self
                .http
                .post(self.generate_url())
                .json(&body)
                .send()
                .await
                .map_err(classify)?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(RuntimeError::ModelAbsent {
                    model: request.model.clone(),
                });
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(RuntimeError::Api {
                    status: status.as_u16(),
                    message: excerpt(&message),
                });
            }
            let parsed: ApiGenerateResponse = response.json().await.map_err(classify)?;
            Ok(parsed.response)
        };

        timeout_at(deadline, call)
            .await
            .map_err(|_| RuntimeError::Timeout)?
    }

    async fn ensure_present(&self, model: &str, deadline: Instant) -> Result<(), RuntimeError> {
        let installed = self.list_models(deadline).await?;
        if installed.iter().any(|name| model_matches(name, model)) {
            Ok(())
        } else {
            Err(RuntimeError::ModelAbsent {
                model: model.to_string(),
            })
        }
    }

    async fn list_models(&self, deadline: Instant) -> Result<Vec<String>, RuntimeError> {
        let call = async {
            let response = self
                .http
                .get(self.tags_url())
                .send()
                .await
                .map_err(classify)?;
            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(RuntimeError::Api {
                    status: status.as_u16(),
                    message: excerpt(&message),
                });
            }
            let parsed: ApiTagsResponse = response.json().await.map_err(classify)?;
            Ok(parsed.models.into_iter().map(|m| m.name).collect())
        };

        timeout_at(deadline, call)
            .await
            .map_err(|_| RuntimeError::Timeout)?
    }

    async fn unload(&self, model: &str) {
        // An empty generation with keep_alive=0 asks the runtime to
        // release the model's memory.
        let body = ApiGenerateRequest {
            model,
            prompt: "",
            stream: false,
            options: None,
            keep_alive: self.keep_alive,
        };
        match self.http.post(self.generate_url()).json(&body).send().await {
            Ok(response) => debug!(model, status = %response.status(), "unload requested"),
            Err(error) => debug!(model, %error, "unload request failed; continuing"),
        }
    }
}
