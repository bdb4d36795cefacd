use uuid::Uuid;

use crate::types::JobStatus;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, TalentrootError>;

#[derive(Debug, thiserror::Error)]
pub enum TalentrootError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("No proxy available for source {0}")]
    NoProxyAvailable(Uuid),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Source not found: {0}")]
    SourceNotFound(Uuid),

    #[error("Record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Job {0} exceeded its wall-clock budget")]
    JobTimedOut(Uuid),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
