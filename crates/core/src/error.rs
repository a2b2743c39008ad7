#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid job identifier: {0:?}")]
    InvalidJobId(String),

    #[error("Unsupported scale: {0}x. Supported: 2, 4")]
    UnsupportedScale(u8),

    #[error("Artifact error: {0}")]
    Artifact(String),
}
