//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] fclip_media::MediaError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] fclip_ml_client::MlError),

    #[error("Queue error: {0}")]
    Queue(#[from] fclip_queue::QueueError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether a media failure only affects one extractor or candidate.
    ///
    /// Unreadable input and failed tool runs are recovered by the stage
    /// that hit them; anything else (missing binaries, I/O) aborts the job.
    pub fn is_recoverable_media(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_input_error() || e.is_tool_failure(),
            _ => false,
        }
    }
}
