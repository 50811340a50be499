use crate::payload::JobPayload;
use chrono::{DateTime, Utc};
use job_queue::{QueueJob, QueuePriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

/// Job families processed by the typed workers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    Classification,
    Optimization,
    Conversion,
    Deduplication,
    QualityAssessment,
    SimilarityScoring,
    EmbeddingGeneration,
    ContentAnalysis,
    SemanticClustering,
    ModelOptimization,
    ContextAssembly,
    FolderSuggestion,
    BatchImport,
    IntelligencePipeline,
}

impl JobType {
    /// Every known job family.
    pub fn all() -> Vec<JobType> {
        JobType::iter().collect()
    }

    /// Default dispatch priority for jobs whose caller did not pick one.
    pub fn default_priority(&self) -> QueuePriority {
        match self {
            Self::Optimization | Self::Classification | Self::Conversion => {
                QueuePriority::Critical
            }
            Self::QualityAssessment | Self::ContentAnalysis | Self::EmbeddingGeneration => {
                QueuePriority::High
            }
            Self::Deduplication | Self::SimilarityScoring | Self::SemanticClustering => {
                QueuePriority::Normal
            }
            _ => QueuePriority::Low,
        }
    }
}

/// Job lifecycle status.
///
/// Transitions form a DAG:
/// `pending → processing → (completed | failed | retry)`;
/// `retry → processing`; `failed | retry → dead` once the retry budget is
/// spent. `completed`, `failed` and `dead` are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
    Dead,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Dead)
    }

    /// Whether a transition from `self` to `to` is on the DAG. Transitions
    /// to the current status are allowed (and treated as no-ops upstream).
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        if *self == to {
            return true;
        }
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                // Cancellation and enqueue failures terminate pending jobs directly
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Retry)
                | (Self::Retry, Self::Processing)
                | (Self::Retry, Self::Dead)
                | (Self::Failed, Self::Dead)
        )
    }
}

/// The central job entity.
///
/// The durable store is authoritative for this record; the broker only holds
/// in-flight handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub priority: QueuePriority,
    pub status: JobStatus,
    pub payload: JobPayload,
    /// Projected from the payload so user listings never scan blobs.
    pub user_id: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a pending job from a request. The id doubles as the broker
    /// handle and the store key.
    pub fn from_request(request: NewJob) -> Self {
        let user_id = request.payload.user_id().to_string();
        let job_type = request.payload.job_type();
        let priority = request
            .priority
            .unwrap_or_else(|| job_type.default_priority());
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            job_type,
            priority,
            status: JobStatus::Pending,
            payload: request.payload,
            user_id,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(3),
            result: None,
            error: None,
            created_at: now,
            scheduled_at: request
                .delay
                .map(|d| now + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition in place, maintaining the timestamp
    /// invariants: `started_at` is set only on the first move to processing
    /// and never regresses; `completed_at` is set on any terminal move.
    ///
    /// A transition to the current status is a no-op. Off-DAG transitions
    /// are rejected.
    pub fn apply_transition(
        &mut self,
        status: JobStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), crate::error::JobError> {
        if self.status == status {
            return Ok(());
        }
        if !self.status.can_transition_to(status) {
            return Err(crate::error::JobError::IllegalTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        let now = Utc::now();
        if status == JobStatus::Processing && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
        if let Some(result) = result {
            self.result = Some(result);
        }
        if let Some(error) = error {
            self.error = Some(error);
        }
        self.status = status;
        Ok(())
    }

    /// Seconds spent processing, for completed jobs.
    pub fn processing_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}

impl QueueJob for Job {
    fn job_id(&self) -> String {
        self.id.to_string()
    }

    fn queue(&self) -> String {
        self.job_type.to_string()
    }

    fn priority(&self) -> QueuePriority {
        self.priority
    }

    fn user_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn with_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Request to enqueue a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub payload: JobPayload,
    /// Explicit priority; derived from the job type when absent.
    pub priority: Option<QueuePriority>,
    /// Eligibility delay for scheduled work.
    pub delay: Option<std::time::Duration>,
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            priority: None,
            delay: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ClassificationPayload;

    fn classification_job() -> Job {
        Job::from_request(NewJob::new(JobPayload::Classification(
            ClassificationPayload {
                user_id: "u1".to_string(),
                content: "You are a helpful assistant.".to_string(),
                format: ".md".to_string(),
                target_models: None,
                item_id: None,
            },
        )))
    }

    #[test]
    fn test_priority_derivation_tiers() {
        assert_eq!(
            JobType::Classification.default_priority(),
            QueuePriority::Critical
        );
        assert_eq!(JobType::Conversion.default_priority(), QueuePriority::Critical);
        assert_eq!(
            JobType::QualityAssessment.default_priority(),
            QueuePriority::High
        );
        assert_eq!(
            JobType::Deduplication.default_priority(),
            QueuePriority::Normal
        );
        assert_eq!(JobType::BatchImport.default_priority(), QueuePriority::Low);
    }

    #[test]
    fn test_job_type_round_trips_as_snake_case() {
        assert_eq!(JobType::QualityAssessment.to_string(), "quality_assessment");
        assert_eq!(
            "semantic_clustering".parse::<JobType>().unwrap(),
            JobType::SemanticClustering
        );
    }

    #[test]
    fn test_status_dag() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Retry));
        assert!(Retry.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Dead));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Dead.can_transition_to(Pending));
    }

    #[test]
    fn test_transition_sets_timestamps_once() {
        let mut job = classification_job();
        assert!(job.started_at.is_none());

        job.apply_transition(JobStatus::Processing, None, None).unwrap();
        let first_start = job.started_at.unwrap();

        job.apply_transition(JobStatus::Retry, None, Some("hiccup".to_string()))
            .unwrap();
        job.apply_transition(JobStatus::Processing, None, None).unwrap();
        assert_eq!(job.started_at.unwrap(), first_start);

        job.apply_transition(
            JobStatus::Completed,
            Some(serde_json::json!({ "ok": true })),
            None,
        )
        .unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.completed_at.unwrap() >= first_start);
    }

    #[test]
    fn test_same_status_transition_is_noop() {
        let mut job = classification_job();
        job.apply_transition(JobStatus::Processing, None, None).unwrap();
        let started = job.started_at;

        job.apply_transition(JobStatus::Processing, None, None).unwrap();
        assert_eq!(job.started_at, started);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut job = classification_job();
        let err = job
            .apply_transition(JobStatus::Completed, None, None)
            .unwrap_err();
        assert!(err.to_string().contains("pending"));
    }

    #[test]
    fn test_job_implements_queue_job() {
        let job = classification_job();
        assert_eq!(job.queue(), "classification");
        assert_eq!(job.user_id(), Some("u1".to_string()));
        assert_eq!(job.priority(), QueuePriority::Critical);
        assert_eq!(job.with_retry().retry_count, 1);
    }
}
