//! In-memory job store.
//!
//! Backs tests and single-process setups. A single mutex serializes writers,
//! which trivially satisfies the per-id serializability contract.

use crate::error::{JobError, JobResult};
use crate::models::{Job, JobStatus, JobType};
use crate::repository::JobRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> JobResult<std::sync::MutexGuard<'_, HashMap<Uuid, Job>>> {
        self.jobs
            .lock()
            .map_err(|_| JobError::Internal("job store lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> JobResult<()> {
        let mut jobs = self.lock()?;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> JobResult<Option<Job>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> JobResult<Job> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        job.apply_transition(status, result, error)?;
        Ok(job.clone())
    }

    async fn increment_retry(&self, id: Uuid) -> JobResult<u32> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        job.retry_count += 1;
        Ok(job.retry_count)
    }

    async fn requeue(&self, id: Uuid) -> JobResult<Job> {
        let mut jobs = self.lock()?;
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status != JobStatus::Failed {
            return Err(JobError::IllegalTransition {
                from: job.status.to_string(),
                to: JobStatus::Pending.to_string(),
            });
        }
        job.status = JobStatus::Pending;
        job.completed_at = None;
        job.error = None;
        Ok(job.clone())
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> JobResult<Vec<Job>> {
        let jobs = self.lock()?;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.status == status).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> JobResult<Vec<Job>> {
        let jobs = self.lock()?;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let mut jobs = self.lock()?;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map(|c| c < cutoff).unwrap_or(false))
        });
        Ok((before - jobs.len()) as u64)
    }

    async fn count_all(&self) -> JobResult<u64> {
        Ok(self.lock()?.len() as u64)
    }

    async fn count_by_status(&self, status: JobStatus) -> JobResult<u64> {
        Ok(self.lock()?.values().filter(|j| j.status == status).count() as u64)
    }

    async fn count_terminal_since(
        &self,
        status: JobStatus,
        since: DateTime<Utc>,
    ) -> JobResult<u64> {
        Ok(self
            .lock()?
            .values()
            .filter(|j| {
                j.status == status && j.completed_at.map(|c| c >= since).unwrap_or(false)
            })
            .count() as u64)
    }

    async fn list_recent_completed(&self, limit: usize) -> JobResult<Vec<Job>> {
        let jobs = self.lock()?;
        let mut completed: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        completed.truncate(limit);
        Ok(completed)
    }

    async fn count_by_type(&self) -> JobResult<Vec<(JobType, u64)>> {
        let jobs = self.lock()?;
        let mut counts: HashMap<JobType, u64> = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.job_type).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewJob;
    use crate::payload::{ContentAnalysisPayload, JobPayload};

    fn job_for(user: &str) -> Job {
        Job::from_request(NewJob::new(JobPayload::ContentAnalysis(
            ContentAnalysisPayload {
                user_id: user.to_string(),
                content: "text".to_string(),
                include_quality: None,
                include_summary: None,
                include_tags: None,
            },
        )))
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let repo = InMemoryJobRepository::new();
        let job = job_for("u1");
        repo.create(&job).await.unwrap();

        let fetched = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_status_walks_dag() {
        let repo = InMemoryJobRepository::new();
        let job = job_for("u1");
        repo.create(&job).await.unwrap();

        repo.update_status(job.id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        let done = repo
            .update_status(
                job.id,
                JobStatus::Completed,
                Some(serde_json::json!({ "ok": true })),
                None,
            )
            .await
            .unwrap();

        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert_eq!(done.result, Some(serde_json::json!({ "ok": true })));

        // Terminal: re-processing is rejected
        let err = repo
            .update_status(job.id, JobStatus::Processing, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn test_list_by_user_uses_projection() {
        let repo = InMemoryJobRepository::new();
        for _ in 0..3 {
            repo.create(&job_for("u1")).await.unwrap();
        }
        repo.create(&job_for("u2")).await.unwrap();

        let listed = repo.list_by_user("u1", 10).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.iter().all(|j| j.user_id == "u1"));
    }

    #[tokio::test]
    async fn test_delete_completed_before_only_sweeps_terminal() {
        let repo = InMemoryJobRepository::new();

        let old = job_for("u1");
        repo.create(&old).await.unwrap();
        repo.update_status(old.id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        repo.update_status(old.id, JobStatus::Completed, None, None)
            .await
            .unwrap();

        let live = job_for("u1");
        repo.create(&live).await.unwrap();

        let removed = repo
            .delete_completed_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(old.id).await.unwrap().is_none());
        assert!(repo.get(live.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_requeue_only_from_failed() {
        let repo = InMemoryJobRepository::new();
        let job = job_for("u1");
        repo.create(&job).await.unwrap();

        assert!(repo.requeue(job.id).await.is_err());

        repo.update_status(job.id, JobStatus::Processing, None, None)
            .await
            .unwrap();
        repo.update_status(job.id, JobStatus::Failed, None, Some("boom".to_string()))
            .await
            .unwrap();

        let requeued = repo.requeue(job.id).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert!(requeued.completed_at.is_none());
        assert!(requeued.error.is_none());
    }

    #[tokio::test]
    async fn test_increment_retry() {
        let repo = InMemoryJobRepository::new();
        let job = job_for("u1");
        repo.create(&job).await.unwrap();

        assert_eq!(repo.increment_retry(job.id).await.unwrap(), 1);
        assert_eq!(repo.increment_retry(job.id).await.unwrap(), 2);
    }
}
