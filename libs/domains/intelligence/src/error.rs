use job_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntelligenceError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type IntelligenceResult<T> = Result<T, IntelligenceError>;

impl From<IntelligenceError> for QueueError {
    fn from(err: IntelligenceError) -> Self {
        match err {
            IntelligenceError::Validation(msg) => QueueError::Validation(msg),
            IntelligenceError::ItemNotFound(id) => {
                QueueError::Processing(format!("item {id} not found"))
            }
            IntelligenceError::Provider(msg) => QueueError::Provider(msg),
            IntelligenceError::Store(msg) => QueueError::Store(msg),
            IntelligenceError::Internal(msg) => QueueError::Internal(msg),
        }
    }
}

/// Errors surfaced by the LLM/embedding provider seam.
///
/// Workers never propagate these: a failed provider call switches the worker
/// to its rule-based fallback path and tags the result with
/// `metadata.fallback = true`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider returned an unparsable response: {0}")]
    InvalidResponse(String),

    #[error("Provider rate limited: {0}")]
    RateLimited(String),
}
