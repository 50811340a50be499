//! Queue façade.
//!
//! The single API used by producers and the pipeline: enqueue, status,
//! cancel, listings, progress, cleanup. Combines the durable store, the
//! in-memory broker, and the progress cache; also implements the runtime's
//! `JobLifecycle` seam so workers drive transitions through the same store.

use crate::error::{JobError, JobResult};
use crate::models::{Job, JobStatus, NewJob};
use crate::repository::JobRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_queue::{
    Broker, BusEvent, EventBus, EventKind, JobLifecycle, JobProgress, ProgressStore, QueueError,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct JobQueueService {
    repo: Arc<dyn JobRepository>,
    broker: Broker<Job>,
    progress: Arc<dyn ProgressStore>,
    bus: EventBus,
}

impl JobQueueService {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        broker: Broker<Job>,
        progress: Arc<dyn ProgressStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            repo,
            broker,
            progress,
            bus,
        }
    }

    pub fn broker(&self) -> &Broker<Job> {
        &self.broker
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn progress_store(&self) -> Arc<dyn ProgressStore> {
        Arc::clone(&self.progress)
    }

    /// Enqueue a job: persist the record, hand the broker an in-flight
    /// handle, and announce it on the bus. The returned id equals the store
    /// id. A broker submit failure propagates to the caller; the persisted
    /// record is failed so no orphan stays pending.
    pub async fn add_job(&self, request: NewJob) -> JobResult<Uuid> {
        request.payload.validate().map_err(JobError::from)?;

        let delay = request.delay;
        let job = Job::from_request(request);
        let job_id = job.id;

        self.repo.create(&job).await?;

        let submit_result = match delay {
            Some(delay) => self.broker.submit_delayed(job.clone(), delay),
            None => self.broker.submit(job.clone()),
        };

        if let Err(e) = submit_result {
            warn!(job_id = %job_id, error = %e, "Broker rejected job, failing record");
            self.repo
                .update_status(
                    job_id,
                    JobStatus::Failed,
                    None,
                    Some(format!("enqueue failed: {e}")),
                )
                .await
                .ok();
            return Err(e.into());
        }

        info!(
            job_id = %job_id,
            job_type = %job.job_type,
            priority = %job.priority,
            user_id = %job.user_id,
            "Enqueued job"
        );

        self.bus.publish(
            BusEvent::for_job(
                EventKind::JobCreated,
                job_id.to_string(),
                json!({
                    "jobId": job_id,
                    "type": job.job_type,
                    "priority": job.priority,
                }),
            )
            .with_user(job.user_id.clone()),
        );

        Ok(job_id)
    }

    /// Full job record, straight from the authoritative store.
    pub async fn get_job(&self, id: Uuid) -> JobResult<Option<Job>> {
        self.repo.get(id).await
    }

    /// Best-effort cancel. A pending job is removed from the broker and
    /// failed with reason "cancelled"; an active job is left to finish.
    /// Returns whether the job was cancelled.
    pub async fn cancel_job(&self, id: Uuid) -> JobResult<bool> {
        if !self.broker.remove(&id.to_string()) {
            return Ok(false);
        }

        let job = self
            .repo
            .update_status(id, JobStatus::Failed, None, Some("cancelled".to_string()))
            .await?;

        self.bus.publish(
            BusEvent::for_job(
                EventKind::JobFailed,
                id.to_string(),
                json!({
                    "jobId": id,
                    "type": job.job_type,
                    "error": "cancelled",
                    "message": format!("{} job cancelled", job.job_type),
                }),
            )
            .with_user(job.user_id.clone()),
        );

        info!(job_id = %id, "Cancelled pending job");
        Ok(true)
    }

    pub async fn list_by_user(&self, user_id: &str, limit: usize) -> JobResult<Vec<Job>> {
        self.repo.list_by_user(user_id, limit).await
    }

    pub async fn list_by_status(&self, status: JobStatus, limit: usize) -> JobResult<Vec<Job>> {
        self.repo.list_by_status(status, limit).await
    }

    /// Write a progress tuple for a job and publish the matching event.
    pub async fn update_progress(
        &self,
        id: Uuid,
        percentage: u8,
        message: &str,
        data: Option<Value>,
    ) -> JobResult<()> {
        let mut progress = JobProgress::new(id.to_string(), percentage, message);
        if let Some(data) = data.clone() {
            progress = progress.with_data(data);
        }
        self.progress.put(&progress).await.map_err(JobError::from)?;

        self.bus.publish(BusEvent::for_job(
            EventKind::JobProgress,
            id.to_string(),
            json!({
                "jobId": id,
                "percentage": progress.percentage,
                "message": message,
                "data": data,
            }),
        ));
        Ok(())
    }

    /// Latest progress tuple, or None when absent or expired.
    pub async fn get_job_progress(&self, id: Uuid) -> JobResult<Option<JobProgress>> {
        self.progress
            .get(&id.to_string())
            .await
            .map_err(JobError::from)
    }

    pub async fn increment_retry(&self, id: Uuid) -> JobResult<u32> {
        self.repo.increment_retry(id).await
    }

    /// Sweep terminal jobs completed before the cutoff.
    pub async fn cleanup_old_jobs(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let removed = self.repo.delete_completed_before(cutoff).await?;
        if removed > 0 {
            info!(removed, "Swept old terminal jobs");
        }
        Ok(removed)
    }

    pub(crate) fn repository(&self) -> Arc<dyn JobRepository> {
        Arc::clone(&self.repo)
    }

    fn parse_id(job_id: &str) -> Result<Uuid, QueueError> {
        job_id
            .parse()
            .map_err(|_| QueueError::Store(format!("malformed job id '{job_id}'")))
    }
}

#[async_trait]
impl JobLifecycle for JobQueueService {
    async fn mark_processing(&self, job_id: &str) -> Result<(), QueueError> {
        let id = Self::parse_id(job_id)?;
        self.repo
            .update_status(id, JobStatus::Processing, None, None)
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, job_id: &str, result: &Value) -> Result<(), QueueError> {
        let id = Self::parse_id(job_id)?;
        self.repo
            .update_status(id, JobStatus::Completed, Some(result.clone()), None)
            .await?;
        Ok(())
    }

    async fn mark_retry(&self, job_id: &str, error: &str) -> Result<(), QueueError> {
        let id = Self::parse_id(job_id)?;
        self.repo.increment_retry(id).await?;
        self.repo
            .update_status(id, JobStatus::Retry, None, Some(error.to_string()))
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<(), QueueError> {
        let id = Self::parse_id(job_id)?;
        self.repo
            .update_status(id, JobStatus::Failed, None, Some(error.to_string()))
            .await?;
        Ok(())
    }
}
