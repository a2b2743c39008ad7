//! REST client for the transformation service.
//!
//! Wraps the result-bearing endpoint (`POST /upscale`, multipart) and the
//! discovery endpoints (`GET /scales`, `GET /health`) using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use stagesync_core::job_id::JobId;
use stagesync_core::result::ProcessingResult;
use stagesync_core::scale::Scale;

/// Raw input for one job.  Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub bytes: Bytes,
    pub file_name: String,
    pub media_type: String,
}

/// Response of `GET /scales`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScalesResponse {
    pub scales: Vec<u8>,
    pub default: u8,
    /// Scales whose models are already resident on the server.
    #[serde(default)]
    pub loaded: Vec<u8>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(rename = "modelLoaded", default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub loaded_scales: Vec<u8>,
    #[serde(default)]
    pub supported_scales: Vec<u8>,
}

/// Errors from the result channel.
#[derive(Debug, thiserror::Error)]
pub enum ResultClientError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status.  `detail` is the
    /// server-supplied message when present, else a generic one.
    #[error("{detail}")]
    Server { status: u16, detail: String },
}

/// Submits jobs and awaits their result.
#[async_trait]
pub trait ResultSubmitter: Send + Sync + 'static {
    /// Send the input and wait for the service's single response.
    ///
    /// A returned result may still have `success == false`; callers must
    /// check both layers.
    async fn submit(
        &self,
        input: &JobInput,
        scale: Scale,
        job_id: &JobId,
    ) -> Result<ProcessingResult, ResultClientError>;
}

/// HTTP client for one transformation service.
pub struct ResultClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl ResultClient {
    /// * `base_url` - service root, e.g. `http://host:8000`.
    pub fn new(base_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (shares the connection pool
    /// with the progress transport).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: None,
        }
    }

    /// Bound the submit request.  Unset by default: long jobs are only
    /// limited by the transport.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Supported and loaded scale factors.
    pub async fn scales(&self) -> Result<ScalesResponse, ResultClientError> {
        let response = self
            .client
            .get(format!("{}/scales", self.base_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Service health and model residency.
    pub async fn health(&self) -> Result<HealthResponse, ResultClientError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, turning a failure
    /// into [`ResultClientError::Server`] with the best available detail.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ResultClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResultClientError::Server {
                status: status.as_u16(),
                detail: server_detail(&body)
                    .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16())),
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ResultClientError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ResultSubmitter for ResultClient {
    async fn submit(
        &self,
        input: &JobInput,
        scale: Scale,
        job_id: &JobId,
    ) -> Result<ProcessingResult, ResultClientError> {
        let file = reqwest::multipart::Part::stream_with_length(
            input.bytes.clone(),
            input.bytes.len() as u64,
        )
            .file_name(input.file_name.clone())
            .mime_str(&input.media_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("scale", scale.factor().to_string())
            .text("job_id", job_id.to_string());

        let mut request = self
            .client
            .post(format!("{}/upscale", self.base_url))
            .multipart(form);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        tracing::info!(
            job_id = %job_id,
            scale = %scale,
            bytes = input.bytes.len(),
            file_name = %input.file_name,
            "Submitting job",
        );

        let response = request.send().await?;
        Self::parse_response(response).await
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"detail": "..."}`, `{"detail": [...]}` (validation error
/// lists, rendered as JSON), and `{"message": "..."}`.
fn server_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let detail = value.get("detail").or_else(|| value.get("message"))?;
    match detail {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::String(_) | serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
