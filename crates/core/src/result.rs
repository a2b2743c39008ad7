//! Wire types for the result-bearing request.
//!
//! The service answers the submission with a single JSON object:
//! `{success, processedArtifact?, message?, job_id, metadata?}`.  Older
//! servers name the artifact `processedImage` and the phase timings
//! `upscaling_time` / `encoding_time`; both spellings are accepted.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Outcome of one transformation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Application-level success.  May be `false` even when the transport
    /// succeeded.
    pub success: bool,
    /// Encoded artifact, usually a `data:image/png;base64,...` URL.
    #[serde(
        default,
        rename = "processedArtifact",
        alias = "processedImage",
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Echo of the submitted job id.
    #[serde(default)]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
}

/// Size and timing descriptors attached to a successful result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default)]
    pub input_dimensions: Option<String>,
    #[serde(default)]
    pub output_dimensions: Option<String>,
    #[serde(default)]
    pub scale: Option<u32>,
    /// Total server-side time, e.g. `"12.34s"`.
    #[serde(default)]
    pub processing_time: Option<String>,
    #[serde(default, alias = "upscaling_time")]
    pub transform_time: Option<String>,
    #[serde(default, alias = "encoding_time")]
    pub encode_time: Option<String>,
}

/// The three duration measurements of a result, parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultTimings {
    pub total: Option<Duration>,
    pub transform: Option<Duration>,
    pub encode: Option<Duration>,
}

/// Fallback message when a failed result carries none.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Processing failed";

impl ProcessingResult {
    /// The message to surface when `success` is false.
    pub fn failure_message(&self) -> &str {
        self.message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_FAILURE_MESSAGE)
    }

    /// Decode the artifact into raw bytes, stripping any `data:` URL
    /// prefix.
    pub fn decode_artifact(&self) -> Result<Vec<u8>, CoreError> {
        let artifact = self
            .artifact
            .as_deref()
            .ok_or_else(|| CoreError::Artifact("result carries no artifact".into()))?;
        decode_data_url(artifact)
    }

    pub fn timings(&self) -> ResultTimings {
        self.metadata
            .as_ref()
            .map(ResultMetadata::timings)
            .unwrap_or_default()
    }
}

impl ResultMetadata {
    pub fn timings(&self) -> ResultTimings {
        ResultTimings {
            total: self.processing_time.as_deref().and_then(parse_seconds),
            transform: self.transform_time.as_deref().and_then(parse_seconds),
            encode: self.encode_time.as_deref().and_then(parse_seconds),
        }
    }
}

/// Parse a server duration string such as `"12.34s"` or `"0.5"`.
pub fn parse_seconds(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix('s').unwrap_or(trimmed).trim();
    let secs: f64 = number.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Decode a base64 payload, optionally wrapped as
/// `data:<mime>;base64,<payload>`.
pub fn decode_data_url(raw: &str) -> Result<Vec<u8>, CoreError> {
    let payload = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest
                .split_once(',')
                .ok_or_else(|| CoreError::Artifact("data URL without payload".into()))?;
            if !header.ends_with(";base64") {
                return Err(CoreError::Artifact(format!(
                    "unsupported data URL encoding: {header}"
                )));
            }
            body
        }
        None => raw,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::Artifact(format!("invalid base64 artifact: {e}")))
}
