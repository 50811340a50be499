//! Metrics for queue and worker observability.
//!
//! Thin wrappers over the `metrics` facade so call sites stay uniform.
//!
//! ## Available Metrics
//!
//! - `queue_jobs_processed_total` - Counter of jobs processed by status
//! - `queue_job_duration_seconds` - Histogram of job processing time
//! - `queue_depth` - Gauge of waiting jobs per queue
//! - `queue_in_flight_jobs` - Gauge of concurrently processing jobs
//! - `queue_retries_total` - Counter of retry attempts

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names as constants for consistency
pub mod names {
    pub const JOBS_PROCESSED: &str = "queue_jobs_processed_total";
    pub const JOB_DURATION: &str = "queue_job_duration_seconds";
    pub const QUEUE_DEPTH: &str = "queue_depth";
    pub const IN_FLIGHT_JOBS: &str = "queue_in_flight_jobs";
    pub const RETRIES: &str = "queue_retries_total";
}

/// Job outcome for metrics labeling
#[derive(Debug, Clone, Copy)]
pub enum JobStatus {
    Success,
    Failed,
    Retried,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retried => "retried",
        }
    }
}

/// Record a job as processed with the given outcome.
pub fn record_job_processed(queue: &str, status: JobStatus) {
    counter!(
        names::JOBS_PROCESSED,
        "queue" => queue.to_string(),
        "status" => status.as_str().to_string()
    )
    .increment(1);
}

/// Record how long a job took to process.
pub fn record_job_duration(queue: &str, duration: Duration) {
    histogram!(names::JOB_DURATION, "queue" => queue.to_string()).record(duration.as_secs_f64());
}

/// Record the current queue depth.
pub fn set_queue_depth(queue: &str, depth: usize) {
    gauge!(names::QUEUE_DEPTH, "queue" => queue.to_string()).set(depth as f64);
}

/// Record the current number of in-flight jobs.
pub fn set_in_flight_jobs(queue: &str, count: usize) {
    gauge!(names::IN_FLIGHT_JOBS, "queue" => queue.to_string()).set(count as f64);
}

/// Record a retry attempt.
pub fn record_retry(queue: &str, attempt: u32) {
    counter!(
        names::RETRIES,
        "queue" => queue.to_string(),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}
