//! PostgreSQL job store.

use crate::entity::job;
use crate::error::{JobError, JobResult};
use crate::models::{Job, JobStatus, JobType};
use crate::repository::JobRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_queue::QueuePriority;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

pub struct PgJobRepository {
    db: DatabaseConnection,
}

impl PgJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Fetch a job inside a transaction; row-level locking keeps status
    /// transitions serialized per id.
    async fn fetch_for_update(txn: &DatabaseTransaction, id: Uuid) -> JobResult<Job> {
        let model = job::Entity::find_by_id(id)
            .one(txn)
            .await?
            .ok_or(JobError::NotFound(id))?;
        model.try_into()
    }

    async fn persist(txn: &DatabaseTransaction, updated: &Job) -> JobResult<()> {
        let active = active_model_from(updated)?;
        job::Entity::update(active).exec(txn).await?;
        Ok(())
    }

    fn terminal_statuses() -> Vec<String> {
        vec![
            JobStatus::Completed.to_string(),
            JobStatus::Failed.to_string(),
            JobStatus::Dead.to_string(),
        ]
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, new_job: &Job) -> JobResult<()> {
        let active = active_model_from(new_job)?;
        job::Entity::insert(active).exec(&self.db).await?;
        tracing::info!(job_id = %new_job.id, job_type = %new_job.job_type, "Created job");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> JobResult<Option<Job>> {
        let model = job::Entity::find_by_id(id).one(&self.db).await?;
        model.map(TryInto::try_into).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> JobResult<Job> {
        let txn = self.db.begin().await?;
        let mut current = Self::fetch_for_update(&txn, id).await?;
        current.apply_transition(status, result, error)?;
        Self::persist(&txn, &current).await?;
        txn.commit().await?;
        Ok(current)
    }

    async fn increment_retry(&self, id: Uuid) -> JobResult<u32> {
        let txn = self.db.begin().await?;
        let mut current = Self::fetch_for_update(&txn, id).await?;
        current.retry_count += 1;
        Self::persist(&txn, &current).await?;
        txn.commit().await?;
        Ok(current.retry_count)
    }

    async fn requeue(&self, id: Uuid) -> JobResult<Job> {
        let txn = self.db.begin().await?;
        let mut current = Self::fetch_for_update(&txn, id).await?;
        if current.status != JobStatus::Failed {
            return Err(JobError::IllegalTransition {
                from: current.status.to_string(),
                to: JobStatus::Pending.to_string(),
            });
        }
        current.status = JobStatus::Pending;
        current.completed_at = None;
        current.error = None;
        Self::persist(&txn, &current).await?;
        txn.commit().await?;
        Ok(current)
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> JobResult<Vec<Job>> {
        let models = job::Entity::find()
            .filter(job::Column::Status.eq(status.to_string()))
            .order_by_desc(job::Column::CreatedAt)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        models.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> JobResult<Vec<Job>> {
        let models = job::Entity::find()
            .filter(job::Column::UserId.eq(user_id))
            .order_by_desc(job::Column::CreatedAt)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        models.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let result = job::Entity::delete_many()
            .filter(job::Column::Status.is_in(Self::terminal_statuses()))
            .filter(job::Column::CompletedAt.lt(cutoff))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn count_all(&self) -> JobResult<u64> {
        Ok(job::Entity::find().count(&self.db).await?)
    }

    async fn count_by_status(&self, status: JobStatus) -> JobResult<u64> {
        Ok(job::Entity::find()
            .filter(job::Column::Status.eq(status.to_string()))
            .count(&self.db)
            .await?)
    }

    async fn count_terminal_since(
        &self,
        status: JobStatus,
        since: DateTime<Utc>,
    ) -> JobResult<u64> {
        Ok(job::Entity::find()
            .filter(job::Column::Status.eq(status.to_string()))
            .filter(job::Column::CompletedAt.gte(since))
            .count(&self.db)
            .await?)
    }

    async fn list_recent_completed(&self, limit: usize) -> JobResult<Vec<Job>> {
        let models = job::Entity::find()
            .filter(job::Column::Status.eq(JobStatus::Completed.to_string()))
            .order_by_desc(job::Column::CompletedAt)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        models.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_by_type(&self) -> JobResult<Vec<(JobType, u64)>> {
        // Small type universe: count per known family rather than grouping
        // in SQL, which keeps unknown stored types from breaking the query.
        let mut counts = Vec::new();
        for job_type in JobType::all() {
            let count = job::Entity::find()
                .filter(job::Column::JobType.eq(job_type.to_string()))
                .count(&self.db)
                .await?;
            if count > 0 {
                counts.push((job_type, count));
            }
        }
        Ok(counts)
    }
}

fn active_model_from(domain: &Job) -> JobResult<job::ActiveModel> {
    Ok(job::ActiveModel {
        id: Set(domain.id),
        job_type: Set(domain.job_type.to_string()),
        priority: Set(domain.priority.to_string()),
        status: Set(domain.status.to_string()),
        payload: Set(serde_json::to_value(&domain.payload)
            .map_err(|e| JobError::Internal(e.to_string()))?),
        user_id: Set(domain.user_id.clone()),
        retry_count: Set(domain.retry_count as i32),
        max_retries: Set(domain.max_retries as i32),
        result: Set(domain.result.clone()),
        error: Set(domain.error.clone()),
        created_at: Set(domain.created_at.into()),
        scheduled_at: Set(domain.scheduled_at.map(Into::into)),
        started_at: Set(domain.started_at.map(Into::into)),
        completed_at: Set(domain.completed_at.map(Into::into)),
    })
}

impl TryFrom<job::Model> for Job {
    type Error = JobError;

    fn try_from(model: job::Model) -> Result<Self, Self::Error> {
        let job_type: JobType = model
            .job_type
            .parse()
            .map_err(|_| JobError::Internal(format!("unknown job type '{}'", model.job_type)))?;
        let status: JobStatus = model
            .status
            .parse()
            .map_err(|_| JobError::Internal(format!("unknown status '{}'", model.status)))?;
        let priority: QueuePriority = serde_json::from_value(Value::String(model.priority.clone()))
            .map_err(|_| JobError::Internal(format!("unknown priority '{}'", model.priority)))?;

        Ok(Self {
            id: model.id,
            job_type,
            priority,
            status,
            payload: serde_json::from_value(model.payload)
                .map_err(|e| JobError::Internal(format!("payload decode failed: {e}")))?,
            user_id: model.user_id,
            retry_count: model.retry_count.max(0) as u32,
            max_retries: model.max_retries.max(0) as u32,
            result: model.result,
            error: model.error,
            created_at: model.created_at.into(),
            scheduled_at: model.scheduled_at.map(Into::into),
            started_at: model.started_at.map(Into::into),
            completed_at: model.completed_at.map(Into::into),
        })
    }
}
