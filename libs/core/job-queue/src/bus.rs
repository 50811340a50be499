//! In-process lifecycle event bus.
//!
//! Producers publish best-effort; each subscriber gets an independent bounded
//! buffer with drop-oldest semantics on lag. A slow or failed subscriber never
//! affects publishers or other subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Minimum per-subscriber buffer before drop-oldest kicks in.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Kinds of lifecycle and system events carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCreated,
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
    JobRetry,
    SystemStatus,
    HealthCheck,
    Notification,
    SystemAlert,
    AnalyticsEvent,
    AnalyticsUpdate,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobCreated => "job_created",
            Self::JobStarted => "job_started",
            Self::JobProgress => "job_progress",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::JobRetry => "job_retry",
            Self::SystemStatus => "system_status",
            Self::HealthCheck => "health_check",
            Self::Notification => "notification",
            Self::SystemAlert => "system_alert",
            Self::AnalyticsEvent => "analytics_event",
            Self::AnalyticsUpdate => "analytics_update",
        }
    }
}

/// A single event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub kind: EventKind,
    /// Job this event concerns, when any.
    pub job_id: Option<String>,
    /// Target user; targeted events deliver only to this user's connections.
    pub user_id: Option<String>,
    /// Subscription channel for channel-scoped events (e.g. "analytics").
    pub channel: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            job_id: None,
            user_id: None,
            channel: None,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn for_job(kind: EventKind, job_id: impl Into<String>, data: Value) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Self::new(kind, data)
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// Bounded broadcast bus for lifecycle events.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(EVENT_BUS_CAPACITY));
        Self { tx }
    }

    /// Publish an event. Non-blocking and best-effort: with no subscribers
    /// the event is dropped, and lagging subscribers lose the oldest events.
    pub fn publish(&self, event: BusEvent) {
        let kind = event.kind;
        // send only fails when there are no receivers, which is fine
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(kind = kind.as_str(), subscribers = delivered, "Published bus event");
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
