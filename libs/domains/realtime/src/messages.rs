//! Wire frames for the realtime channel.
//!
//! One JSON message per websocket frame. Client frames carry `{type, data,
//! timestamp}`; server frames carry `{type, userId?, data, timestamp, id?}`.

use chrono::{DateTime, Utc};
use job_queue::{BusEvent, EventKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

/// Commands a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientCommand {
    Authenticate,
    SystemStatus,
    HealthCheck,
    ActivityFeed,
    Subscribe,
    Unsubscribe,
    AnalyticsPing,
}

/// One client frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub command: ClientCommand,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parameters of an `activity_feed` request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ActivityFeedRequest {
    #[serde(default = "default_feed_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_feed_limit() -> usize {
    20
}

/// Server frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageKind {
    Connect,
    Authenticate,
    JobCreated,
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
    JobRetry,
    SystemStatus,
    HealthCheck,
    ActivityFeed,
    ItemCreated,
    ItemUpdated,
    ItemDeleted,
    CollectionUpdated,
    Notification,
    Alert,
    SubscriptionConfirmed,
    SubscriptionCancelled,
    AnalyticsPong,
    AnalyticsEvent,
    AnalyticsUpdate,
    SystemAlert,
}

/// One server frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ServerMessage {
    pub fn new(kind: ServerMessageKind, data: Value) -> Self {
        Self {
            kind,
            user_id: None,
            data,
            timestamp: Utc::now(),
            id: Some(Uuid::new_v4().to_string()),
        }
    }

    pub fn targeted(kind: ServerMessageKind, user_id: impl Into<String>, data: Value) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new(kind, data)
        }
    }

    pub fn alert(message: impl Into<String>) -> Self {
        Self::new(
            ServerMessageKind::Alert,
            serde_json::json!({ "message": message.into() }),
        )
    }
}

/// Map a bus event onto its outbound frame.
impl From<BusEvent> for ServerMessage {
    fn from(event: BusEvent) -> Self {
        let kind = match event.kind {
            EventKind::JobCreated => ServerMessageKind::JobCreated,
            EventKind::JobStarted => ServerMessageKind::JobStarted,
            EventKind::JobProgress => ServerMessageKind::JobProgress,
            EventKind::JobCompleted => ServerMessageKind::JobCompleted,
            EventKind::JobFailed => ServerMessageKind::JobFailed,
            EventKind::JobRetry => ServerMessageKind::JobRetry,
            EventKind::SystemStatus => ServerMessageKind::SystemStatus,
            EventKind::HealthCheck => ServerMessageKind::HealthCheck,
            EventKind::Notification => ServerMessageKind::Notification,
            EventKind::SystemAlert => ServerMessageKind::SystemAlert,
            EventKind::AnalyticsEvent => ServerMessageKind::AnalyticsEvent,
            EventKind::AnalyticsUpdate => ServerMessageKind::AnalyticsUpdate,
        };

        Self {
            kind,
            user_id: event.user_id,
            data: event.data,
            timestamp: event.timestamp,
            id: event.job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frame_parses() {
        let frame: ClientMessage = serde_json::from_value(json!({
            "type": "authenticate",
            "data": { "token": "abc" },
            "timestamp": "2026-08-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(frame.command, ClientCommand::Authenticate);
        assert_eq!(frame.data["token"], "abc");
    }

    #[test]
    fn test_client_frame_without_data() {
        let frame: ClientMessage =
            serde_json::from_value(json!({ "type": "system_status" })).unwrap();
        assert_eq!(frame.command, ClientCommand::SystemStatus);
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let result =
            serde_json::from_value::<ClientMessage>(json!({ "type": "drop_tables" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_activity_feed_defaults_and_bounds() {
        let request: ActivityFeedRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.limit, 20);
        assert_eq!(request.offset, 0);
        assert!(request.validate().is_ok());

        let oversized: ActivityFeedRequest =
            serde_json::from_value(json!({ "limit": 5000 })).unwrap();
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn test_server_frame_shape() {
        let message = ServerMessage::targeted(
            ServerMessageKind::JobCompleted,
            "u1",
            json!({ "jobId": "j1" }),
        );
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "job_completed");
        assert_eq!(json["userId"], "u1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_untargeted_frame_omits_user_id() {
        let message = ServerMessage::new(ServerMessageKind::SystemStatus, json!({}));
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("userId").is_none());
    }

    #[test]
    fn test_bus_event_mapping() {
        let event = BusEvent::for_job(EventKind::JobFailed, "job-1", json!({ "error": "x" }))
            .with_user("u1");
        let message: ServerMessage = event.into();

        assert_eq!(message.kind, ServerMessageKind::JobFailed);
        assert_eq!(message.user_id.as_deref(), Some("u1"));
        assert_eq!(message.id.as_deref(), Some("job-1"));
    }
}
