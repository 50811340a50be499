//! Queue manager.
//!
//! Supervision on top of the façade: bulk operations, statistics, stuck-job
//! detection, periodic health and progress broadcasts, scheduled retry of
//! recent failures, and graceful shutdown.

use crate::error::JobResult;
use crate::models::{Job, JobStatus, JobType, NewJob};
use crate::service::JobQueueService;
use chrono::{Duration as ChronoDuration, Utc};
use job_queue::{BusEvent, EventKind, QueueStats};
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Timer and threshold knobs for the manager loops.
#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    /// Health check cadence.
    pub health_interval: Duration,
    /// Progress re-broadcast cadence.
    pub progress_interval: Duration,
    /// Processing jobs older than this count as stuck.
    pub stuck_after: Duration,
    /// How long shutdown waits for active jobs to drain.
    pub shutdown_deadline: Duration,
    /// Terminal jobs older than this are swept at shutdown.
    pub sweep_age: Duration,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            progress_interval: Duration::from_secs(5),
            stuck_after: Duration::from_secs(600),
            shutdown_deadline: Duration::from_secs(30),
            sweep_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// System-wide queue statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatistics {
    pub queues: HashMap<String, QueueCounters>,
    pub total_jobs: u64,
    pub active_jobs: u64,
    pub completed_today: u64,
    pub failed_today: u64,
    /// Sampled from the last 100 completed jobs.
    pub average_processing_seconds: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounters {
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

impl From<QueueStats> for QueueCounters {
    fn from(stats: QueueStats) -> Self {
        Self {
            waiting: stats.waiting,
            active: stats.active,
            completed: stats.completed,
            failed: stats.failed,
        }
    }
}

/// Outcome of a bulk cancel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkCancelOutcome {
    pub cancelled: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// Outcome of a retry-failed sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RetryOutcome {
    pub retried: usize,
    pub skipped: usize,
}

/// Options for [`QueueManager::retry_failed_jobs`].
#[derive(Debug, Clone)]
pub struct RetryFailedOptions {
    /// Only failures whose terminal timestamp falls inside this window.
    pub window: Duration,
    /// Restrict to one job family.
    pub job_type: Option<JobType>,
    /// Cap on re-enqueued jobs.
    pub limit: usize,
}

impl Default for RetryFailedOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 3600),
            job_type: None,
            limit: 50,
        }
    }
}

/// Result of one health pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub unhealthy_queues: Vec<String>,
    pub stuck_jobs: usize,
    pub broker_backing_ok: bool,
    pub stats: QueueStatistics,
}

pub struct QueueManager {
    service: Arc<JobQueueService>,
    /// Redis-style backing store, pinged by the health loop.
    backing: Option<ConnectionManager>,
    config: QueueManagerConfig,
}

impl QueueManager {
    pub fn new(service: Arc<JobQueueService>, backing: Option<ConnectionManager>) -> Self {
        Self {
            service,
            backing,
            config: QueueManagerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueueManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn service(&self) -> &Arc<JobQueueService> {
        &self.service
    }

    /// Enqueue one job; priority falls back to the type's tier when the
    /// caller does not pick one.
    pub async fn create_job(&self, request: NewJob) -> JobResult<Uuid> {
        self.service.add_job(request).await
    }

    /// Enqueue a batch, returning ids in input order. Fails fast on the
    /// first enqueue error so the caller never gets a partial id list.
    pub async fn bulk_create(&self, requests: Vec<NewJob>) -> JobResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(requests.len());
        for request in requests {
            ids.push(self.service.add_job(request).await?);
        }
        Ok(ids)
    }

    /// Cancel many jobs, partitioning into cancelled and failed.
    pub async fn bulk_cancel(&self, ids: Vec<Uuid>) -> BulkCancelOutcome {
        let mut outcome = BulkCancelOutcome::default();
        for id in ids {
            match self.service.cancel_job(id).await {
                Ok(true) => outcome.cancelled.push(id),
                Ok(false) => outcome.failed.push(id),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Bulk cancel failed for job");
                    outcome.failed.push(id);
                }
            }
        }
        outcome
    }

    /// Current statistics snapshot.
    pub async fn statistics(&self) -> JobResult<QueueStatistics> {
        let repo = self.service.repository();
        let broker = self.service.broker();

        let queues = broker
            .all_stats()
            .into_iter()
            .map(|(name, stats)| (name, stats.into()))
            .collect();

        let today = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);

        let recent = repo.list_recent_completed(100).await?;
        let samples: Vec<f64> = recent.iter().filter_map(Job::processing_seconds).collect();
        let average_processing_seconds = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        };

        Ok(QueueStatistics {
            queues,
            total_jobs: repo.count_all().await?,
            active_jobs: repo.count_by_status(JobStatus::Processing).await?,
            completed_today: repo.count_terminal_since(JobStatus::Completed, today).await?,
            failed_today: repo.count_terminal_since(JobStatus::Failed, today).await?,
            average_processing_seconds,
        })
    }

    /// Jobs that have been processing longer than the stuck threshold.
    pub async fn stuck_jobs(&self) -> JobResult<Vec<Job>> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.stuck_after)
                .unwrap_or_else(|_| ChronoDuration::seconds(600));

        let processing = self
            .service
            .repository()
            .list_by_status(JobStatus::Processing, 500)
            .await?;

        Ok(processing
            .into_iter()
            .filter(|job| job.started_at.map(|s| s < cutoff).unwrap_or(false))
            .collect())
    }

    /// Run one health pass and publish the result on the bus.
    pub async fn health_check(&self) -> JobResult<HealthReport> {
        let stuck = self.stuck_jobs().await?;
        let mut unhealthy_queues: Vec<String> = stuck
            .iter()
            .map(|job| job.job_type.to_string())
            .collect();
        unhealthy_queues.sort();
        unhealthy_queues.dedup();

        let broker_backing_ok = match &self.backing {
            Some(conn) => {
                let mut conn = conn.clone();
                match database::redis::check_health(&mut conn).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Broker backing store ping failed");
                        false
                    }
                }
            }
            None => true,
        };

        let stats = self.statistics().await?;
        let report = HealthReport {
            healthy: unhealthy_queues.is_empty() && broker_backing_ok,
            stuck_jobs: stuck.len(),
            unhealthy_queues,
            broker_backing_ok,
            stats,
        };

        if !report.healthy {
            warn!(
                stuck = report.stuck_jobs,
                unhealthy = ?report.unhealthy_queues,
                backing_ok = report.broker_backing_ok,
                "Queue health degraded"
            );
        }

        self.service.bus().publish(BusEvent::new(
            EventKind::HealthCheck,
            serde_json::to_value(&report).unwrap_or_else(|_| json!({ "healthy": false })),
        ));

        Ok(report)
    }

    /// Health loop: one pass every `health_interval` until shutdown.
    pub async fn run_health_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.health_check().await {
                        error!(error = %e, "Health check failed");
                    }
                }
            }
        }
        debug!("Health loop stopped");
    }

    /// Progress re-broadcast loop: republish last-known progress for active
    /// jobs so late-joining subscribers get a recent snapshot.
    pub async fn run_progress_broadcast(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.progress_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.broadcast_active_progress().await {
                        debug!(error = %e, "Progress broadcast pass failed");
                    }
                }
            }
        }
        debug!("Progress broadcast loop stopped");
    }

    async fn broadcast_active_progress(&self) -> JobResult<()> {
        let active = self
            .service
            .repository()
            .list_by_status(JobStatus::Processing, 100)
            .await?;

        for job in active {
            if let Some(progress) = self.service.get_job_progress(job.id).await? {
                self.service.bus().publish(
                    BusEvent::for_job(
                        EventKind::JobProgress,
                        job.id.to_string(),
                        json!({
                            "jobId": job.id,
                            "percentage": progress.percentage,
                            "message": progress.message,
                            "data": progress.data,
                        }),
                    )
                    .with_user(job.user_id.clone()),
                );
            }
        }
        Ok(())
    }

    /// Re-enqueue recent failures that still have retry budget. Exhausted
    /// failures inside the window are marked dead and counted as skipped.
    pub async fn retry_failed_jobs(&self, options: RetryFailedOptions) -> JobResult<RetryOutcome> {
        let repo = self.service.repository();
        let window_start = Utc::now()
            - ChronoDuration::from_std(options.window)
                .unwrap_or_else(|_| ChronoDuration::hours(24));

        let failed = repo.list_by_status(JobStatus::Failed, 500).await?;
        let mut outcome = RetryOutcome::default();

        for job in failed {
            if outcome.retried >= options.limit {
                break;
            }
            let in_window = job
                .completed_at
                .map(|c| c >= window_start)
                .unwrap_or(false);
            let type_matches = options
                .job_type
                .map(|t| t == job.job_type)
                .unwrap_or(true);
            if !in_window || !type_matches {
                continue;
            }

            if job.retry_count >= 3 {
                if let Err(e) = repo
                    .update_status(job.id, JobStatus::Dead, None, None)
                    .await
                {
                    warn!(job_id = %job.id, error = %e, "Failed to mark exhausted job dead");
                }
                outcome.skipped += 1;
                continue;
            }

            match repo.requeue(job.id).await {
                Ok(requeued) => {
                    if let Err(e) = self.service.broker().submit(requeued) {
                        warn!(job_id = %job.id, error = %e, "Requeue submit failed");
                        outcome.skipped += 1;
                    } else {
                        info!(job_id = %job.id, "Re-enqueued failed job");
                        outcome.retried += 1;
                    }
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Requeue failed");
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// Graceful shutdown: wait for the broker to drain active jobs (bounded
    /// by the deadline), then sweep old terminal jobs.
    pub async fn shutdown(&self) -> JobResult<()> {
        info!("Queue manager shutting down");
        let deadline = tokio::time::Instant::now() + self.config.shutdown_deadline;

        loop {
            let active = self.service.broker().total_active();
            if active == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "Shutdown deadline reached with jobs still active");
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.sweep_age)
                .unwrap_or_else(|_| ChronoDuration::days(7));
        let swept = self.service.cleanup_old_jobs(cutoff).await?;
        info!(swept, "Queue manager shutdown complete");
        Ok(())
    }
}
