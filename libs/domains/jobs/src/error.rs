use job_queue::QueueError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type JobResult<T> = Result<T, JobError>;

impl From<sea_orm::DbErr> for JobError {
    fn from(err: sea_orm::DbErr) -> Self {
        JobError::Database(err.to_string())
    }
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Validation(msg) => JobError::Validation(msg),
            other => JobError::Queue(other.to_string()),
        }
    }
}

impl From<JobError> for QueueError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Validation(msg) => QueueError::Validation(msg),
            JobError::NotFound(id) => QueueError::Store(format!("job {id} not found")),
            other => QueueError::Store(other.to_string()),
        }
    }
}
