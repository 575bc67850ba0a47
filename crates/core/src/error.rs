use crate::types::FrameId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Frame not found: {0}")]
    FrameNotFound(FrameId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed document: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
