//! Error types for queue operations.
//!
//! This module provides:
//! - `QueueError` - The main error type for queue and worker operations
//! - `ErrorCategory` - Classification of errors driving retry behavior

use thiserror::Error;

/// Errors that can occur during queue and worker operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Redis connection or command error (progress cache, health ping).
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload failed the per-type schema. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Job processing error from the worker body.
    #[error("Processing error: {0}")]
    Processing(String),

    /// External provider raised a recoverable error.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Durable store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Broker/queue operation error.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Job was cancelled while still pending.
    #[error("Job cancelled")]
    Cancelled,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Categorize the error to decide whether the runtime retries it.
    pub fn category(&self) -> ErrorCategory {
        match self {
            // Bad payloads and malformed data never get better on retry
            Self::Validation(_) | Self::Serialization(_) => ErrorCategory::Permanent,

            // A cancelled job is terminal
            Self::Cancelled => ErrorCategory::Permanent,

            // Provider / infrastructure errors are worth retrying with backoff
            Self::Redis(_) | Self::Provider(_) | Self::Store(_) | Self::Queue(_) => {
                ErrorCategory::Transient
            }

            // Processing errors need inspection
            Self::Processing(s) => {
                let lower = s.to_lowercase();
                if lower.contains("invalid")
                    || lower.contains("malformed")
                    || lower.contains("not found")
                    || lower.contains("unauthorized")
                    || lower.contains("forbidden")
                {
                    ErrorCategory::Permanent
                } else {
                    ErrorCategory::Transient
                }
            }

            Self::Internal(_) => ErrorCategory::Transient,
        }
    }

    /// Whether the runtime may retry a job that failed with this error.
    pub fn is_retryable(&self) -> bool {
        self.category().should_retry()
    }
}

/// Error category driving retry behavior.
///
/// - `Transient`: temporary issues that will likely resolve with retry
///   (provider hiccups, connection issues, timeouts)
/// - `Permanent`: errors that won't be fixed by retrying (invalid payloads,
///   cancelled jobs, missing entities)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
}

impl ErrorCategory {
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}
