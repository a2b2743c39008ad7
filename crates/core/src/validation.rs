//! Input validation performed before any network activity.
//!
//! The real acceptance rules belong to the transformation service; the
//! client only rejects what the service is known to refuse so the user
//! gets a caller-correctable error without a round trip.

use std::path::Path;

use crate::error::CoreError;

/// Media types the service accepts.
pub const ACCEPTED_MEDIA_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/webp"];

/// Validation collaborator: accepts raw input bytes and a declared media
/// type, returns accept or reject.
pub trait InputValidator: Send + Sync {
    fn validate(&self, input: &[u8], media_type: &str) -> Result<(), CoreError>;
}

/// Default validator: non-empty input of an accepted media type, with an
/// optional size ceiling.
#[derive(Debug, Clone)]
pub struct MediaTypeValidator {
    accepted: Vec<String>,
    max_bytes: Option<usize>,
}

impl MediaTypeValidator {
    /// Media types are compared case-insensitively.
    pub fn new(accepted: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            accepted: accepted
                .into_iter()
                .map(|a| a.into().trim().to_ascii_lowercase())
                .collect(),
            max_bytes: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

impl Default for MediaTypeValidator {
    fn default() -> Self {
        Self::new(ACCEPTED_MEDIA_TYPES.iter().copied())
    }
}

impl InputValidator for MediaTypeValidator {
    fn validate(&self, input: &[u8], media_type: &str) -> Result<(), CoreError> {
        let media_type = media_type.trim().to_ascii_lowercase();
        if !self.accepted.iter().any(|a| *a == media_type) {
            return Err(CoreError::Validation(format!(
                "Unsupported file type: {media_type}"
            )));
        }
        if input.is_empty() {
            return Err(CoreError::Validation("Input is empty".into()));
        }
        if let Some(max) = self.max_bytes {
            if input.len() > max {
                return Err(CoreError::Validation(format!(
                    "Input is {} bytes, limit is {max}",
                    input.len()
                )));
            }
        }
        Ok(())
    }
}

/// Guess a media type from a file extension.
pub fn infer_media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
