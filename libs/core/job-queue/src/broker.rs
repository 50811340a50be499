//! In-memory priority broker.
//!
//! One broker instance serves every job family. Each queue keeps a ready heap
//! ordered by (priority desc, submission seq asc), a delayed heap ordered by
//! eligibility time, and an active set bounded by the consuming worker's
//! declared concurrency. The broker guarantees at-most-one active dispatch
//! per job id; removal of pending entries is a tombstone so heap order never
//! needs rebuilding.

use crate::error::QueueError;
use crate::priority::QueuePriority;
use crate::registry::QueueJob;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry delay policy: exponential, base doubled per attempt, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt, given the number of retries already
    /// spent: 2s, 4s, 8s, ... capped at `max`.
    pub fn delay_for_attempt(&self, attempts_spent: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let exp = base_ms.saturating_mul(2u64.saturating_pow(attempts_spent));
        Duration::from_millis(exp.min(self.max.as_millis() as u64))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(60),
        }
    }
}

/// Per-queue counters exposed by [`Broker::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

struct ReadyEntry<J> {
    job: J,
    priority: QueuePriority,
    seq: u64,
}

impl<J> PartialEq for ReadyEntry<J> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<J> Eq for ReadyEntry<J> {}

impl<J> Ord for ReadyEntry<J> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<J> PartialOrd for ReadyEntry<J> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct DelayedEntry<J> {
    job: J,
    priority: QueuePriority,
    seq: u64,
    eligible_at: Instant,
}

impl<J> PartialEq for DelayedEntry<J> {
    fn eq(&self, other: &Self) -> bool {
        self.eligible_at == other.eligible_at && self.seq == other.seq
    }
}
impl<J> Eq for DelayedEntry<J> {}

impl<J> Ord for DelayedEntry<J> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap inverted into earliest-eligible-first
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<J> PartialOrd for DelayedEntry<J> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueState<J> {
    ready: BinaryHeap<ReadyEntry<J>>,
    delayed: BinaryHeap<DelayedEntry<J>>,
    active: HashSet<String>,
    removed: HashSet<String>,
    max_active: usize,
    completed: u64,
    failed: u64,
}

impl<J> QueueState<J> {
    fn new(max_active: usize) -> Self {
        Self {
            ready: BinaryHeap::new(),
            delayed: BinaryHeap::new(),
            active: HashSet::new(),
            removed: HashSet::new(),
            max_active: max_active.max(1),
            completed: 0,
            failed: 0,
        }
    }
}

/// Shared in-memory priority broker.
///
/// Cloning is cheap; all clones operate on the same queues.
pub struct Broker<J: QueueJob> {
    queues: Arc<Mutex<HashMap<String, QueueState<J>>>>,
    notify: Arc<Notify>,
    seq: Arc<Mutex<u64>>,
    policy: BackoffPolicy,
}

impl<J: QueueJob> Clone for Broker<J> {
    fn clone(&self) -> Self {
        Self {
            queues: Arc::clone(&self.queues),
            notify: Arc::clone(&self.notify),
            seq: Arc::clone(&self.seq),
            policy: self.policy,
        }
    }
}

impl<J: QueueJob> Broker<J> {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            seq: Arc::new(Mutex::new(0)),
            policy,
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Declare a queue and its concurrency cap. Idempotent; re-registering
    /// updates the cap without touching queued entries.
    pub fn register_queue(&self, queue: &str, max_active: usize) {
        let mut queues = self.lock_queues();
        queues
            .entry(queue.to_string())
            .and_modify(|state| state.max_active = max_active.max(1))
            .or_insert_with(|| QueueState::new(max_active));
        debug!(queue = %queue, max_active, "Registered queue");
    }

    /// Submit a job for immediate dispatch.
    pub fn submit(&self, job: J) -> Result<(), QueueError> {
        self.submit_delayed(job, Duration::ZERO)
    }

    /// Submit a job eligible for dispatch only after `delay`.
    pub fn submit_delayed(&self, job: J, delay: Duration) -> Result<(), QueueError> {
        let queue_name = job.queue();
        let job_id = job.job_id();
        let priority = job.priority();
        let seq = self.next_seq();

        {
            let mut queues = self.lock_queues();
            let state = queues
                .entry(queue_name.clone())
                .or_insert_with(|| QueueState::new(1));

            // A resubmitted id must not sit behind its own tombstone
            state.removed.remove(&job_id);

            if state.active.contains(&job_id) {
                return Err(QueueError::Queue(format!(
                    "job {job_id} is already active on queue {queue_name}"
                )));
            }

            if delay.is_zero() {
                state.ready.push(ReadyEntry { job, priority, seq });
            } else {
                state.delayed.push(DelayedEntry {
                    job,
                    priority,
                    seq,
                    eligible_at: Instant::now() + delay,
                });
            }
        }

        debug!(
            queue = %queue_name,
            job_id = %job_id,
            priority = %priority,
            delay_ms = delay.as_millis() as u64,
            "Submitted job"
        );
        self.notify.notify_waiters();
        Ok(())
    }

    /// Requeue a failed job with the policy's exponential backoff, given the
    /// number of retries already spent.
    pub fn submit_retry(&self, job: J, attempts_spent: u32) -> Result<(), QueueError> {
        let delay = self.policy.delay_for_attempt(attempts_spent);
        self.submit_delayed(job, delay)
    }

    /// Dispatch the next eligible job for `queue`, honoring the concurrency
    /// cap. Returns None when the queue is empty, fully delayed, or at its
    /// cap. The returned job is tracked as active until acknowledged or
    /// released.
    pub fn next_ready(&self, queue: &str) -> Option<J> {
        let mut queues = self.lock_queues();
        let state = queues.get_mut(queue)?;

        Self::promote_eligible(state);

        if state.active.len() >= state.max_active {
            return None;
        }

        while let Some(entry) = state.ready.pop() {
            let job_id = entry.job.job_id();
            if state.removed.remove(&job_id) {
                continue; // tombstoned by remove()
            }
            state.active.insert(job_id);
            return Some(entry.job);
        }

        None
    }

    /// Acknowledge a dispatched job as finished. `success` feeds the
    /// windowed completed/failed counters.
    pub fn acknowledge(&self, queue: &str, job_id: &str, success: bool) {
        let mut queues = self.lock_queues();
        if let Some(state) = queues.get_mut(queue) {
            if state.active.remove(job_id) {
                if success {
                    state.completed += 1;
                } else {
                    state.failed += 1;
                }
            } else {
                warn!(queue = %queue, job_id = %job_id, "Acknowledged unknown job");
            }
        }
        drop(queues);
        self.notify.notify_waiters();
    }

    /// Release an active slot without counting an outcome (retry path).
    pub fn release(&self, queue: &str, job_id: &str) {
        let mut queues = self.lock_queues();
        if let Some(state) = queues.get_mut(queue) {
            state.active.remove(job_id);
        }
        drop(queues);
        self.notify.notify_waiters();
    }

    /// Drop a pending job. Returns true when the id was waiting (ready or
    /// delayed); false when it is active or unknown — active jobs cannot be
    /// cancelled mid-flight.
    pub fn remove(&self, job_id: &str) -> bool {
        let mut queues = self.lock_queues();
        for state in queues.values_mut() {
            if state.active.contains(job_id) {
                return false;
            }
            let pending = state.ready.iter().any(|e| e.job.job_id() == job_id)
                || state.delayed.iter().any(|e| e.job.job_id() == job_id);
            if pending {
                state.removed.insert(job_id.to_string());
                return true;
            }
        }
        false
    }

    /// Per-queue counters. Waiting excludes tombstoned entries.
    pub fn stats(&self, queue: &str) -> QueueStats {
        let mut queues = self.lock_queues();
        match queues.get_mut(queue) {
            Some(state) => {
                Self::promote_eligible(state);
                let tombstoned = |id: &str| state.removed.contains(id);
                let waiting = state
                    .ready
                    .iter()
                    .filter(|e| !tombstoned(&e.job.job_id()))
                    .count()
                    + state
                        .delayed
                        .iter()
                        .filter(|e| !tombstoned(&e.job.job_id()))
                        .count();
                QueueStats {
                    waiting,
                    active: state.active.len(),
                    completed: state.completed,
                    failed: state.failed,
                }
            }
            None => QueueStats::default(),
        }
    }

    /// Snapshot of all registered queues.
    pub fn all_stats(&self) -> HashMap<String, QueueStats> {
        let names: Vec<String> = self.lock_queues().keys().cloned().collect();
        names
            .into_iter()
            .map(|name| {
                let stats = self.stats(&name);
                (name, stats)
            })
            .collect()
    }

    /// Total number of active jobs across every queue.
    pub fn total_active(&self) -> usize {
        self.lock_queues().values().map(|s| s.active.len()).sum()
    }

    /// Wait until new work may be available. Callers should still poll with
    /// a timeout; wakeups can be missed between checks.
    pub async fn work_available(&self) {
        self.notify.notified().await;
    }

    fn promote_eligible(state: &mut QueueState<J>) {
        let now = Instant::now();
        loop {
            match state.delayed.peek() {
                Some(entry) if entry.eligible_at <= now => {}
                _ => break,
            }
            if let Some(DelayedEntry {
                job, priority, seq, ..
            }) = state.delayed.pop()
            {
                if state.removed.remove(&job.job_id()) {
                    continue;
                }
                state.ready.push(ReadyEntry { job, priority, seq });
            }
        }
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.seq.lock().expect("broker seq lock poisoned");
        *seq += 1;
        *seq
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, QueueState<J>>> {
        self.queues.lock().expect("broker queue lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Serialize, Deserialize)]
    struct TestJob {
        id: String,
        queue: String,
        priority: QueuePriority,
        retry_count: u32,
    }

    impl TestJob {
        fn new(id: &str, priority: QueuePriority) -> Self {
            Self {
                id: id.to_string(),
                queue: "test".to_string(),
                priority,
                retry_count: 0,
            }
        }
    }

    impl QueueJob for TestJob {
        fn job_id(&self) -> String {
            self.id.clone()
        }
        fn queue(&self) -> String {
            self.queue.clone()
        }
        fn priority(&self) -> QueuePriority {
            self.priority
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
    }

    fn broker() -> Broker<TestJob> {
        let b = Broker::new(BackoffPolicy::default());
        b.register_queue("test", 2);
        b
    }

    #[tokio::test]
    async fn test_priority_dispatch_order() {
        let broker = broker();
        broker.register_queue("test", 10);

        broker.submit(TestJob::new("low", QueuePriority::Low)).unwrap();
        broker.submit(TestJob::new("critical", QueuePriority::Critical)).unwrap();
        broker.submit(TestJob::new("normal", QueuePriority::Normal)).unwrap();
        broker.submit(TestJob::new("high", QueuePriority::High)).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| broker.next_ready("test"))
            .map(|j| j.id)
            .collect();
        assert_eq!(order, vec!["critical", "high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority_level() {
        let broker = broker();
        broker.register_queue("test", 10);

        for i in 0..5 {
            broker
                .submit(TestJob::new(&format!("job-{i}"), QueuePriority::Normal))
                .unwrap();
        }

        let order: Vec<String> = std::iter::from_fn(|| broker.next_ready("test"))
            .map(|j| j.id)
            .collect();
        assert_eq!(order, vec!["job-0", "job-1", "job-2", "job-3", "job-4"]);
    }

    #[tokio::test]
    async fn test_concurrency_cap_enforced() {
        let broker = broker();

        for i in 0..5 {
            broker
                .submit(TestJob::new(&format!("job-{i}"), QueuePriority::Normal))
                .unwrap();
        }

        assert!(broker.next_ready("test").is_some());
        assert!(broker.next_ready("test").is_some());
        // Cap of 2 reached
        assert!(broker.next_ready("test").is_none());

        broker.acknowledge("test", "job-0", true);
        assert!(broker.next_ready("test").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_not_dispatched_early() {
        let broker = broker();

        broker
            .submit_delayed(
                TestJob::new("later", QueuePriority::Critical),
                Duration::from_secs(5),
            )
            .unwrap();
        broker.submit(TestJob::new("now", QueuePriority::Low)).unwrap();

        // Only the undelayed job is eligible, despite lower priority
        assert_eq!(broker.next_ready("test").unwrap().id, "now");
        assert!(broker.next_ready("test").is_none());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(broker.next_ready("test").unwrap().id, "later");
    }

    #[tokio::test]
    async fn test_remove_pending_but_not_active() {
        let broker = broker();

        broker.submit(TestJob::new("a", QueuePriority::Normal)).unwrap();
        broker.submit(TestJob::new("b", QueuePriority::Normal)).unwrap();

        assert!(broker.remove("b"));
        let dispatched = broker.next_ready("test").unwrap();
        assert_eq!(dispatched.id, "a");
        // "b" was tombstoned, nothing left
        assert!(broker.next_ready("test").is_none());

        // "a" is active now and cannot be removed
        assert!(!broker.remove("a"));
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let broker = broker();

        broker.submit(TestJob::new("a", QueuePriority::Normal)).unwrap();
        broker.submit(TestJob::new("b", QueuePriority::Normal)).unwrap();
        broker.submit(TestJob::new("c", QueuePriority::Normal)).unwrap();

        let _ = broker.next_ready("test").unwrap();
        let stats = broker.stats("test");
        assert_eq!(stats.waiting, 2);
        assert_eq!(stats.active, 1);

        broker.acknowledge("test", "a", true);
        broker.next_ready("test");
        broker.acknowledge("test", "b", false);

        let stats = broker.stats("test");
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_active_submit_rejected() {
        let broker = broker();
        broker.submit(TestJob::new("a", QueuePriority::Normal)).unwrap();
        let job = broker.next_ready("test").unwrap();

        let result = broker.submit(job);
        assert!(matches!(result, Err(QueueError::Queue(_))));
    }

    #[test]
    fn test_backoff_policy_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        // Deep attempts hit the cap
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }
}
