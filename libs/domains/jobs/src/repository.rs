//! Job store seam.
//!
//! The store is authoritative for every job's durable record. All operations
//! are serializable against any single job id; `update_status` maintains the
//! timestamp invariants (`started_at` once, `completed_at` on terminal).

use crate::error::JobResult;
use crate::models::{Job, JobStatus, JobType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new job record with status pending.
    async fn create(&self, job: &Job) -> JobResult<()>;

    /// Fetch the full record.
    async fn get(&self, id: Uuid) -> JobResult<Option<Job>>;

    /// Atomically apply a status transition. A transition to the current
    /// status is a no-op; off-DAG transitions are rejected.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> JobResult<Job>;

    /// Atomically bump the retry counter, returning the new count.
    async fn increment_retry(&self, id: Uuid) -> JobResult<u32>;

    /// Reset a failed job to pending for re-enqueueing, clearing its
    /// terminal timestamp and error.
    async fn requeue(&self, id: Uuid) -> JobResult<Job>;

    /// Jobs with the given status, newest first.
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> JobResult<Vec<Job>>;

    /// A user's jobs, newest first. Served from the projected `user_id`
    /// column, never by scanning payload blobs.
    async fn list_by_user(&self, user_id: &str, limit: usize) -> JobResult<Vec<Job>>;

    /// Remove terminal jobs completed before the cutoff. Returns the number
    /// of rows deleted.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64>;

    /// Total number of job records.
    async fn count_all(&self) -> JobResult<u64>;

    /// Number of jobs currently in the given status.
    async fn count_by_status(&self, status: JobStatus) -> JobResult<u64>;

    /// Number of jobs of a status whose terminal timestamp is at or after
    /// `since` (completed-today / failed-today style windows).
    async fn count_terminal_since(&self, status: JobStatus, since: DateTime<Utc>)
        -> JobResult<u64>;

    /// Most recently completed jobs, newest first, for processing-time
    /// sampling.
    async fn list_recent_completed(&self, limit: usize) -> JobResult<Vec<Job>>;

    /// Per-type counts across all records, for pipeline status summaries.
    async fn count_by_type(&self) -> JobResult<Vec<(JobType, u64)>>;
}
