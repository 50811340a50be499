use domain_intelligence::IntelligenceError;
use domain_jobs::JobError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Item store error: {0}")]
    Items(#[from] IntelligenceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
