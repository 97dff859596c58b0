use thiserror::Error;

/// Errors surfaced by an image or video processing call.
///
/// Every variant is terminal for the call that raised it. There are no retries.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Unsupported content type, oversized payload, or undecodable media.
    #[error("{0}")]
    InvalidInput(String),

    /// The video source could not be opened or read.
    #[error("{0}")]
    SourceUnavailable(String),

    /// Model invocation failure or unexpected I/O during frame iteration.
    #[error("{0}")]
    ProcessingFailure(String),

    /// Temporary resource removal failed after processing. Logged, never returned to clients.
    #[error("cleanup failed: {0}")]
    CleanupFailure(String),
}

impl VisionError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::ProcessingFailure(msg.into())
    }

    /// HTTP status used when this error terminates a request.
    pub fn status_code(&self) -> u16 {
        match self {
            VisionError::InvalidInput(_) | VisionError::SourceUnavailable(_) => 400,
            VisionError::ProcessingFailure(_) | VisionError::CleanupFailure(_) => 500,
        }
    }
}

impl From<std::io::Error> for VisionError {
    fn from(err: std::io::Error) -> Self {
        VisionError::ProcessingFailure(format!("I/O error: {err}"))
    }
}

pub type VisionResult<T> = std::result::Result<T, VisionError>;
