use async_openai::error::OpenAIError;
use thiserror::Error;

/// Unified error type threaded across every crate boundary in the pipeline.
///
/// Handlers map library errors into one of these variants at the point they are
/// produced; nothing downstream should ever need to match on `surrealdb::Error`
/// or `reqwest::Error` directly.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("transient failure in step '{step}': {cause}")]
    Transient { step: String, cause: String },

    #[error("pipeline step '{step}' failed with outcome {outcome}")]
    PipelineStepFailed { step: String, outcome: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(#[from] surrealdb::Error),

    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for outcomes the orchestrator should retry rather than abandon the step for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ExternalUnavailable(_) | AppError::Transient { .. } | AppError::Storage(_)
        )
    }
}
