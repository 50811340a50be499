//! Core traits for queue processing
//!
//! This module defines the seams between the queueing core and domain code:
//! - `QueueJob`: a dispatchable job envelope
//! - `JobProcessor`: a worker body bound to one job family
//! - `JobLifecycle`: the durable store adapter for status transitions
//! - `ProgressReporter`: the callback handed to worker bodies

use crate::bus::{BusEvent, EventBus, EventKind};
use crate::error::QueueError;
use crate::priority::QueuePriority;
use crate::progress::{JobProgress, ProgressStore};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// A job that can be dispatched by the broker.
///
/// Domain envelopes implement this trait to make themselves schedulable.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Job {
///     id: Uuid,
///     job_type: JobType,
///     priority: QueuePriority,
///     user_id: String,
///     retry_count: u32,
/// }
///
/// impl QueueJob for Job {
///     fn job_id(&self) -> String { self.id.to_string() }
///     fn queue(&self) -> String { self.job_type.to_string() }
///     fn priority(&self) -> QueuePriority { self.priority }
///     fn retry_count(&self) -> u32 { self.retry_count }
///     fn with_retry(&self) -> Self {
///         Self { retry_count: self.retry_count + 1, ..self.clone() }
///     }
/// }
/// ```
pub trait QueueJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Get the unique job ID
    fn job_id(&self) -> String;

    /// Get the queue (job family) this job belongs to
    fn queue(&self) -> String;

    /// Get the dispatch priority
    fn priority(&self) -> QueuePriority;

    /// Get the owning user, when the payload carries one
    fn user_id(&self) -> Option<String> {
        None
    }

    /// Get the current retry count
    fn retry_count(&self) -> u32;

    /// Create a new instance with incremented retry count
    fn with_retry(&self) -> Self;

    /// Get the maximum number of retries (default: 3)
    fn max_retries(&self) -> u32 {
        3
    }

    /// Check if the job can be retried
    fn can_retry(&self) -> bool {
        self.retry_count() < self.max_retries()
    }
}

/// Worker body bound to one job family.
///
/// Return `Ok(result)` on success; the runtime persists the result and emits
/// the terminal event. Errors are categorized: transient errors are retried
/// with backoff until the retry budget is spent, permanent errors (validation
/// above all) fail the job immediately.
#[async_trait]
pub trait JobProcessor<J: QueueJob>: Send + Sync {
    /// Process one job, reporting progress through the supplied reporter.
    async fn process(&self, job: &J, progress: &ProgressReporter) -> Result<Value, QueueError>;

    /// Get the processor name (for logging and metrics)
    fn name(&self) -> &'static str;

    /// Perform a health check
    ///
    /// Override to check downstream service availability.
    async fn health_check(&self) -> Result<bool, QueueError> {
        Ok(true)
    }
}

/// Durable store adapter for job status transitions.
///
/// The runtime drives every transition through this seam so the store stays
/// authoritative: `started_at` is set on the first move to processing and
/// `completed_at` on any terminal move. Transitions for one job id are
/// serialized by the implementation.
#[async_trait]
pub trait JobLifecycle: Send + Sync {
    /// pending|retry → processing
    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError>;

    /// processing → completed (terminal), storing the result blob
    async fn mark_completed(&self, job_id: &str, result: &Value) -> Result<(), QueueError>;

    /// processing → retry, incrementing the retry counter
    async fn mark_retry(&self, job_id: &str, error: &str) -> Result<(), QueueError>;

    /// processing → failed (terminal)
    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<(), QueueError>;
}

/// Progress callback handed to worker bodies.
///
/// Writes to the progress cache and publishes a `job_progress` event. Both
/// are best-effort: a cache or bus hiccup never fails the job.
pub struct ProgressReporter {
    job_id: String,
    user_id: Option<String>,
    store: Arc<dyn ProgressStore>,
    bus: EventBus,
}

impl ProgressReporter {
    pub fn new(
        job_id: impl Into<String>,
        user_id: Option<String>,
        store: Arc<dyn ProgressStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id,
            store,
            bus,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Report progress with just a percentage and message.
    pub async fn report(&self, percentage: u8, message: &str) {
        self.report_inner(percentage, message, None).await;
    }

    /// Report progress with an additional data blob.
    pub async fn report_with_data(&self, percentage: u8, message: &str, data: Value) {
        self.report_inner(percentage, message, Some(data)).await;
    }

    async fn report_inner(&self, percentage: u8, message: &str, data: Option<Value>) {
        let mut progress = JobProgress::new(&self.job_id, percentage, message);
        if let Some(data) = data.clone() {
            progress = progress.with_data(data);
        }

        if let Err(e) = self.store.put(&progress).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to cache job progress");
        }

        let mut event = BusEvent::for_job(
            EventKind::JobProgress,
            &self.job_id,
            json!({
                "jobId": self.job_id,
                "percentage": progress.percentage,
                "message": message,
                "data": data,
            }),
        );
        if let Some(user_id) = &self.user_id {
            event = event.with_user(user_id.clone());
        }
        self.bus.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::InMemoryProgressCache;
    use serde::Deserialize;

    #[derive(Clone, Serialize, Deserialize)]
    struct TestJob {
        id: String,
        retry_count: u32,
    }

    impl QueueJob for TestJob {
        fn job_id(&self) -> String {
            self.id.clone()
        }

        fn queue(&self) -> String {
            "test".to_string()
        }

        fn priority(&self) -> QueuePriority {
            QueuePriority::Normal
        }

        fn retry_count(&self) -> u32 {
            self.retry_count
        }

        fn with_retry(&self) -> Self {
            Self {
                id: self.id.clone(),
                retry_count: self.retry_count + 1,
            }
        }
    }

    #[test]
    fn test_queue_job_retry_budget() {
        let job = TestJob {
            id: "job-1".to_string(),
            retry_count: 0,
        };

        assert!(job.can_retry());
        let spent = job.with_retry().with_retry().with_retry();
        assert_eq!(spent.retry_count(), 3);
        assert!(!spent.can_retry());
    }

    #[tokio::test]
    async fn test_reporter_writes_cache_and_bus() {
        let store = Arc::new(InMemoryProgressCache::new());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let reporter =
            ProgressReporter::new("job-1", Some("u1".to_string()), store.clone(), bus.clone());
        reporter.report(55, "halfway").await;

        let cached = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(cached.percentage, 55);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::JobProgress);
        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert_eq!(event.data["percentage"], 55);
    }
}
