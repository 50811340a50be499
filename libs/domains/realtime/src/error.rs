use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed client frame: {0}")]
    BadFrame(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Connection not found")]
    ConnectionGone,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

impl From<domain_jobs::JobError> for RealtimeError {
    fn from(err: domain_jobs::JobError) -> Self {
        RealtimeError::Store(err.to_string())
    }
}
