//! Short-TTL progress cache.
//!
//! Holds the most recent progress tuple per job. Entries expire after
//! [`PROGRESS_TTL`]; each update supersedes the previous one. Stale reads are
//! acceptable by contract.

use crate::error::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Progress entries expire after five minutes.
pub const PROGRESS_TTL: Duration = Duration::from_secs(300);

/// The most recent progress tuple for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub job_id: String,
    /// Percentage in [0, 100].
    pub percentage: u8,
    pub message: String,
    pub data: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    pub fn new(job_id: impl Into<String>, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            percentage: percentage.min(100),
            message: message.into(),
            data: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Storage seam for the progress cache.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Store the progress tuple, superseding any previous entry for the job.
    async fn put(&self, progress: &JobProgress) -> Result<(), QueueError>;

    /// Fetch the most recent progress tuple, or None when absent or expired.
    async fn get(&self, job_id: &str) -> Result<Option<JobProgress>, QueueError>;
}

/// Redis-backed progress cache (SET with EX).
#[derive(Clone)]
pub struct RedisProgressCache {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisProgressCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            ttl: PROGRESS_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(job_id: &str) -> String {
        format!("job:progress:{job_id}")
    }
}

#[async_trait]
impl ProgressStore for RedisProgressCache {
    async fn put(&self, progress: &JobProgress) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(progress)?;

        redis::cmd("SET")
            .arg(Self::key(&progress.job_id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async::<()>(&mut conn)
            .await?;

        debug!(
            job_id = %progress.job_id,
            percentage = progress.percentage,
            "Stored job progress"
        );
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobProgress>, QueueError> {
        let mut conn = self.redis.clone();

        let payload: Option<String> = redis::cmd("GET")
            .arg(Self::key(job_id))
            .query_async(&mut conn)
            .await?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// In-memory progress cache with lazy expiry. Used in tests and as a
/// fallback when no redis backing is configured.
pub struct InMemoryProgressCache {
    entries: Mutex<HashMap<String, (JobProgress, Instant)>>,
    ttl: Duration,
}

impl InMemoryProgressCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: PROGRESS_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for InMemoryProgressCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressCache {
    async fn put(&self, progress: &JobProgress) -> Result<(), QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::Internal("progress cache lock poisoned".to_string()))?;
        entries.insert(progress.job_id.clone(), (progress.clone(), Instant::now()));
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobProgress>, QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::Internal("progress cache lock poisoned".to_string()))?;

        match entries.get(job_id) {
            Some((_, stored_at)) if stored_at.elapsed() > self.ttl => {
                entries.remove(job_id);
                Ok(None)
            }
            Some((progress, _)) => Ok(Some(progress.clone())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = InMemoryProgressCache::new();
        let progress =
            JobProgress::new("job-1", 40, "classifying").with_data(json!({ "stage": "llm" }));

        cache.put(&progress).await.unwrap();
        let fetched = cache.get("job-1").await.unwrap().unwrap();

        assert_eq!(fetched.percentage, 40);
        assert_eq!(fetched.message, "classifying");
        assert_eq!(fetched.data, Some(json!({ "stage": "llm" })));
    }

    #[tokio::test]
    async fn test_update_supersedes_previous() {
        let cache = InMemoryProgressCache::new();

        cache.put(&JobProgress::new("job-1", 10, "start")).await.unwrap();
        cache.put(&JobProgress::new("job-1", 90, "almost")).await.unwrap();

        let fetched = cache.get("job-1").await.unwrap().unwrap();
        assert_eq!(fetched.percentage, 90);
    }

    #[tokio::test]
    async fn test_missing_job_is_none() {
        let cache = InMemoryProgressCache::new();
        assert!(cache.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_none() {
        let cache = InMemoryProgressCache::new().with_ttl(Duration::from_millis(10));
        cache.put(&JobProgress::new("job-1", 10, "start")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("job-1").await.unwrap().is_none());
    }

    #[test]
    fn test_percentage_clamped_to_100() {
        let progress = JobProgress::new("job-1", 250, "overflow");
        assert_eq!(progress.percentage, 100);
    }
}
