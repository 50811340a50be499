//! The generic worker runtime.
//!
//! A `QueueWorker` binds one job family to one processor and drives the full
//! lifecycle envelope around every invocation: store transitions, progress
//! reporting, lifecycle events, retry with backoff, and graceful shutdown.

use crate::broker::Broker;
use crate::bus::{BusEvent, EventBus, EventKind};
use crate::error::{ErrorCategory, QueueError};
use crate::metrics::{self, JobStatus};
use crate::progress::ProgressStore;
use crate::registry::{JobLifecycle, JobProcessor, ProgressReporter, QueueJob};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Configuration for one queue worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue (job family) this worker consumes.
    pub queue: String,

    /// Maximum concurrent jobs; also the broker's dispatch cap.
    pub max_concurrency: usize,

    /// Idle poll interval when no wakeup arrives.
    pub poll_interval: Duration,

    /// Grace window for in-flight jobs on shutdown.
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    pub fn new(queue: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            queue: queue.into(),
            max_concurrency: max_concurrency.max(1),
            poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(30),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Generic worker that consumes one job family from the broker.
///
/// # Type Parameters
///
/// * `J` - The job envelope type (must implement `QueueJob`)
/// * `P` - The processor type (must implement `JobProcessor<J>`)
pub struct QueueWorker<J, P>
where
    J: QueueJob,
    P: JobProcessor<J>,
{
    broker: Broker<J>,
    processor: Arc<P>,
    lifecycle: Arc<dyn JobLifecycle>,
    progress: Arc<dyn ProgressStore>,
    bus: EventBus,
    config: WorkerConfig,
}

impl<J, P> QueueWorker<J, P>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
{
    pub fn new(
        broker: Broker<J>,
        processor: P,
        lifecycle: Arc<dyn JobLifecycle>,
        progress: Arc<dyn ProgressStore>,
        bus: EventBus,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            processor: Arc::new(processor),
            lifecycle,
            progress,
            bus,
            config,
        }
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    /// Run the worker loop until the shutdown signal flips.
    ///
    /// On shutdown the worker stops dispatching immediately and waits up to
    /// `shutdown_grace` for in-flight jobs; survivors are left in status
    /// `processing` for the health loop to flag as stuck.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        self.broker
            .register_queue(&self.config.queue, self.config.max_concurrency);

        info!(
            queue = %self.config.queue,
            processor = %self.processor.name(),
            max_concurrency = %self.config.max_concurrency,
            "Starting queue worker"
        );

        let mut join_set: JoinSet<()> = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                info!(queue = %self.config.queue, "Received shutdown signal, stopping worker");
                break;
            }

            // Fill every free slot; the broker enforces the cap
            while let Some(job) = self.broker.next_ready(&self.config.queue) {
                let processor = Arc::clone(&self.processor);
                let broker = self.broker.clone();
                let lifecycle = Arc::clone(&self.lifecycle);
                let progress = Arc::clone(&self.progress);
                let bus = self.bus.clone();
                let queue = self.config.queue.clone();

                join_set.spawn(async move {
                    Self::process_job(processor, broker, lifecycle, progress, bus, queue, job)
                        .await;
                });
            }

            let stats = self.broker.stats(&self.config.queue);
            metrics::set_queue_depth(&self.config.queue, stats.waiting);
            metrics::set_in_flight_jobs(&self.config.queue, stats.active);

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(queue = %self.config.queue, "Received shutdown signal, stopping worker");
                        break;
                    }
                }
                _ = self.broker.work_available() => {}
                Some(_) = join_set.join_next(), if !join_set.is_empty() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        // Let in-flight jobs finish within the grace window
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                queue = %self.config.queue,
                remaining = join_set.len(),
                "Shutdown grace elapsed; abandoning in-flight jobs as processing"
            );
            join_set.abort_all();
        }

        info!(queue = %self.config.queue, "Queue worker stopped");
        Ok(())
    }

    /// Process a single dispatched job through the lifecycle envelope.
    async fn process_job(
        processor: Arc<P>,
        broker: Broker<J>,
        lifecycle: Arc<dyn JobLifecycle>,
        progress: Arc<dyn ProgressStore>,
        bus: EventBus,
        queue: String,
        job: J,
    ) {
        let job_id = job.job_id();
        let user_id = job.user_id();

        debug!(queue = %queue, job_id = %job_id, "Processing job");

        if let Err(e) = lifecycle.mark_processing(&job_id).await {
            // The store is authoritative; without the transition the job
            // must go back to the queue rather than run untracked
            error!(job_id = %job_id, error = %e, "Failed to mark job processing, requeueing");
            broker.release(&queue, &job_id);
            if let Err(submit_err) = broker.submit_retry(job.with_retry(), job.retry_count()) {
                error!(job_id = %job_id, error = %submit_err, "Failed to requeue job");
            }
            return;
        }

        let mut started = BusEvent::for_job(
            EventKind::JobStarted,
            &job_id,
            json!({ "jobId": job_id, "type": queue }),
        );
        if let Some(user) = &user_id {
            started = started.with_user(user.clone());
        }
        bus.publish(started);

        let reporter =
            ProgressReporter::new(&job_id, user_id.clone(), Arc::clone(&progress), bus.clone());

        let start = std::time::Instant::now();
        let outcome = processor.process(&job, &reporter).await;
        metrics::record_job_duration(&queue, start.elapsed());

        match outcome {
            Ok(result) => {
                if let Err(e) = lifecycle.mark_completed(&job_id, &result).await {
                    error!(job_id = %job_id, error = %e, "Failed to record completion");
                }
                broker.acknowledge(&queue, &job_id, true);
                metrics::record_job_processed(&queue, JobStatus::Success);

                let mut event = BusEvent::for_job(
                    EventKind::JobCompleted,
                    &job_id,
                    json!({
                        "jobId": job_id,
                        "type": queue,
                        "result": result,
                        "message": format!("{} job completed", queue),
                    }),
                );
                if let Some(user) = &user_id {
                    event = event.with_user(user.clone());
                }
                bus.publish(event);
            }
            Err(e) => {
                Self::handle_job_error(&broker, &lifecycle, &bus, &queue, &job, e).await;
            }
        }
    }

    /// Turn a processing error into a retry or a terminal failure.
    async fn handle_job_error(
        broker: &Broker<J>,
        lifecycle: &Arc<dyn JobLifecycle>,
        bus: &EventBus,
        queue: &str,
        job: &J,
        error: QueueError,
    ) {
        let job_id = job.job_id();
        let user_id = job.user_id();
        let category = error.category();

        warn!(
            queue = %queue,
            job_id = %job_id,
            retry_count = %job.retry_count(),
            error = %error,
            error_category = category.as_str(),
            "Job processing failed"
        );

        let retryable = category == ErrorCategory::Transient && job.can_retry();

        if retryable {
            if let Err(e) = lifecycle.mark_retry(&job_id, &error.to_string()).await {
                error!(job_id = %job_id, error = %e, "Failed to record retry transition");
            }
            broker.release(queue, &job_id);

            let attempts_spent = job.retry_count();
            let retried = job.with_retry();
            metrics::record_retry(queue, retried.retry_count());

            let delay = broker.backoff_policy().delay_for_attempt(attempts_spent);
            info!(
                job_id = %job_id,
                retry_attempt = retried.retry_count(),
                delay_ms = delay.as_millis() as u64,
                "Scheduling job retry with backoff"
            );

            let mut event = BusEvent::for_job(
                EventKind::JobRetry,
                &job_id,
                json!({
                    "jobId": job_id,
                    "type": queue,
                    "retryCount": retried.retry_count(),
                    "delayMs": delay.as_millis() as u64,
                }),
            );
            if let Some(user) = &user_id {
                event = event.with_user(user.clone());
            }
            bus.publish(event);

            if let Err(e) = broker.submit_retry(retried, attempts_spent) {
                error!(job_id = %job_id, error = %e, "Failed to requeue job, marking failed");
                if let Err(mark_err) = lifecycle.mark_failed(&job_id, &e.to_string()).await {
                    error!(job_id = %job_id, error = %mark_err, "Failed to record failure");
                }
            }
        } else {
            if let Err(e) = lifecycle.mark_failed(&job_id, &error.to_string()).await {
                error!(job_id = %job_id, error = %e, "Failed to record failure");
            }
            broker.acknowledge(queue, &job_id, false);
            metrics::record_job_processed(queue, JobStatus::Failed);

            let mut event = BusEvent::for_job(
                EventKind::JobFailed,
                &job_id,
                json!({
                    "jobId": job_id,
                    "type": queue,
                    "error": error.to_string(),
                    "message": format!("{} job failed", queue),
                }),
            );
            if let Some(user) = &user_id {
                event = event.with_user(user.clone());
            }
            bus.publish(event);
        }
    }
}
