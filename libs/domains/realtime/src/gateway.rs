//! The realtime gateway.
//!
//! Consumes bus events and fans them out to authenticated connections,
//! answers client commands, heartbeats idle connections, and snapshots
//! gateway metrics to the shared cache.

use crate::auth::AuthVerifier;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::error::{RealtimeError, RealtimeResult};
use crate::messages::{
    ActivityFeedRequest, ClientCommand, ClientMessage, ServerMessage, ServerMessageKind,
};
use chrono::Utc;
use core_config::realtime::RealtimeConfig;
use domain_jobs::{AuditEntry, AuditRepository, QueueManager};
use job_queue::EventBus;
use redis::aio::ConnectionManager;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use validator::Validate;

/// Timer cadences and idle thresholds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_PING_AFTER: Duration = Duration::from_secs(300);
const METRICS_INTERVAL: Duration = Duration::from_secs(30);

pub struct RealtimeGateway {
    registry: ConnectionRegistry,
    bus: EventBus,
    auth: AuthVerifier,
    config: RealtimeConfig,
    manager: Arc<QueueManager>,
    audit: Arc<dyn AuditRepository>,
    /// Shared cache for the periodic metrics snapshot.
    cache: Option<ConnectionManager>,
}

impl RealtimeGateway {
    pub fn new(
        bus: EventBus,
        config: RealtimeConfig,
        manager: Arc<QueueManager>,
        audit: Arc<dyn AuditRepository>,
        cache: Option<ConnectionManager>,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            auth: AuthVerifier::new(config.auth_secret.clone()),
            bus,
            config,
            manager,
            audit,
            cache,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Check an Origin header against the allow-list. Requests without an
    /// Origin header (non-browser clients) are accepted.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => self.config.origin_allowed(origin),
            None => true,
        }
    }

    /// Fan bus events out to connections until shutdown.
    pub async fn run_event_fanout(&self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.bus.subscribe();
        info!("Realtime fan-out started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            let channel = event.channel.clone();
                            let message: ServerMessage = event.into();
                            self.dispatch(message, channel.as_deref()).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Fan-out lagged behind the bus, events dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        info!("Realtime fan-out stopped");
    }

    async fn dispatch(&self, message: ServerMessage, channel: Option<&str>) {
        match &message.user_id {
            Some(user_id) => {
                let user_id = user_id.clone();
                self.registry.send_to_user(&user_id, &message).await;
            }
            None => {
                self.registry.broadcast_authenticated(&message, channel).await;
            }
        }
    }

    /// Heartbeat loop: ping connections idle for over five minutes and let
    /// the registry prune the unwritable ones.
    pub async fn run_heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let idle = self.registry.idle_connections(IDLE_PING_AFTER).await;
                    for id in idle {
                        let delivered = self
                            .registry
                            .send_to(
                                id,
                                ServerMessage::new(
                                    ServerMessageKind::HealthCheck,
                                    json!({ "ping": Utc::now() }),
                                ),
                            )
                            .await;
                        if !delivered {
                            self.registry.unregister(id).await;
                        }
                    }
                }
            }
        }
        debug!("Heartbeat loop stopped");
    }

    /// Metrics snapshot loop: publish gauges and write a snapshot blob to
    /// the shared cache every 30 seconds.
    pub async fn run_metrics_snapshot(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(METRICS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let connections = self.registry.connection_count().await;
                    let authenticated = self.registry.authenticated_count().await;
                    metrics::gauge!("gateway_connections").set(connections as f64);
                    metrics::gauge!("gateway_authenticated_connections")
                        .set(authenticated as f64);

                    if let Some(cache) = &self.cache {
                        let snapshot = json!({
                            "connections": connections,
                            "authenticated": authenticated,
                            "timestamp": Utc::now(),
                        });
                        let mut conn = cache.clone();
                        let result = redis::cmd("SET")
                            .arg("gateway:metrics")
                            .arg(snapshot.to_string())
                            .arg("EX")
                            .arg(METRICS_INTERVAL.as_secs() * 4)
                            .query_async::<()>(&mut conn)
                            .await;
                        if let Err(e) = result {
                            warn!(error = %e, "Metrics snapshot write failed");
                        }
                    }
                }
            }
        }
        debug!("Metrics snapshot loop stopped");
    }

    /// Handle one parsed client frame, returning the direct replies.
    pub async fn handle_client_message(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> Vec<ServerMessage> {
        self.registry.touch(connection_id).await;

        let result = match message.command {
            ClientCommand::Authenticate => self.handle_authenticate(connection_id, &message).await,
            ClientCommand::HealthCheck => Ok(vec![ServerMessage::new(
                ServerMessageKind::HealthCheck,
                json!({ "pong": Utc::now() }),
            )]),
            ClientCommand::SystemStatus => self.handle_system_status(connection_id).await,
            ClientCommand::ActivityFeed => self.handle_activity_feed(connection_id, &message).await,
            ClientCommand::Subscribe => self.handle_subscribe(connection_id, &message, true).await,
            ClientCommand::Unsubscribe => {
                self.handle_subscribe(connection_id, &message, false).await
            }
            ClientCommand::AnalyticsPing => self.handle_analytics_ping(connection_id, &message).await,
        };

        match result {
            Ok(replies) => replies,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "Client command failed");
                vec![ServerMessage::alert(e.to_string())]
            }
        }
    }

    async fn handle_authenticate(
        &self,
        connection_id: ConnectionId,
        message: &ClientMessage,
    ) -> RealtimeResult<Vec<ServerMessage>> {
        let token = message.data["token"]
            .as_str()
            .ok_or_else(|| RealtimeError::BadFrame("authenticate needs a token".to_string()))?;

        let user_id = self.auth.verify(token)?;
        if !self.registry.authenticate(connection_id, &user_id).await {
            return Err(RealtimeError::ConnectionGone);
        }
        info!(connection_id = %connection_id, user_id = %user_id, "Connection authenticated");

        let status = self.system_status_snapshot().await?;
        Ok(vec![
            ServerMessage::targeted(
                ServerMessageKind::Authenticate,
                user_id.clone(),
                json!({ "success": true, "userId": user_id }),
            ),
            status,
        ])
    }

    async fn handle_system_status(
        &self,
        connection_id: ConnectionId,
    ) -> RealtimeResult<Vec<ServerMessage>> {
        self.require_user(connection_id).await?;
        Ok(vec![self.system_status_snapshot().await?])
    }

    async fn system_status_snapshot(&self) -> RealtimeResult<ServerMessage> {
        let stats = self
            .manager
            .statistics()
            .await
            .map_err(|e| RealtimeError::Store(e.to_string()))?;
        let data = serde_json::to_value(&stats)
            .map_err(|e| RealtimeError::Internal(e.to_string()))?;
        Ok(ServerMessage::new(ServerMessageKind::SystemStatus, data))
    }

    async fn handle_activity_feed(
        &self,
        connection_id: ConnectionId,
        message: &ClientMessage,
    ) -> RealtimeResult<Vec<ServerMessage>> {
        let user_id = self.require_user(connection_id).await?;

        let request: ActivityFeedRequest = serde_json::from_value(message.data.clone())
            .map_err(|e| RealtimeError::BadFrame(e.to_string()))?;
        request
            .validate()
            .map_err(|e| RealtimeError::BadFrame(e.to_string()))?;

        let entries = self
            .audit
            .list_by_user(&user_id, request.limit, request.offset)
            .await?;
        let data = serde_json::to_value(&entries)
            .map_err(|e| RealtimeError::Internal(e.to_string()))?;

        Ok(vec![ServerMessage::targeted(
            ServerMessageKind::ActivityFeed,
            user_id,
            json!({ "entries": data }),
        )])
    }

    async fn handle_subscribe(
        &self,
        connection_id: ConnectionId,
        message: &ClientMessage,
        subscribe: bool,
    ) -> RealtimeResult<Vec<ServerMessage>> {
        let user_id = self.require_user(connection_id).await?;
        let channel = message.data["channel"]
            .as_str()
            .ok_or_else(|| RealtimeError::BadFrame("missing channel".to_string()))?;

        let (kind, applied) = if subscribe {
            (
                ServerMessageKind::SubscriptionConfirmed,
                self.registry.subscribe(connection_id, channel).await,
            )
        } else {
            (
                ServerMessageKind::SubscriptionCancelled,
                self.registry.unsubscribe(connection_id, channel).await,
            )
        };

        if !applied && subscribe {
            return Err(RealtimeError::ConnectionGone);
        }

        Ok(vec![ServerMessage::targeted(
            kind,
            user_id,
            json!({ "channel": channel }),
        )])
    }

    async fn handle_analytics_ping(
        &self,
        connection_id: ConnectionId,
        message: &ClientMessage,
    ) -> RealtimeResult<Vec<ServerMessage>> {
        let user_id = self.require_user(connection_id).await?;

        let activity = message.data["activity"].clone();
        let entry = AuditEntry::new(&user_id, "analytics_activity", json!({ "activity": activity }));
        if let Err(e) = self.audit.append(entry).await {
            warn!(error = %e, "Failed to record analytics activity");
        }

        Ok(vec![ServerMessage::targeted(
            ServerMessageKind::AnalyticsPong,
            user_id,
            json!({ "received": Utc::now() }),
        )])
    }

    async fn require_user(&self, connection_id: ConnectionId) -> RealtimeResult<String> {
        self.registry
            .user_of(connection_id)
            .await
            .ok_or(RealtimeError::Unauthenticated)
    }
}

impl std::fmt::Debug for RealtimeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeGateway")
            .field("address", &self.config.address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_jobs::{InMemoryAuditRepository, InMemoryJobRepository, JobQueueService};
    use job_queue::{BackoffPolicy, Broker, BusEvent, EventKind, InMemoryProgressCache};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "gateway-secret";

    fn token_for(user: &str) -> String {
        let now = Utc::now().timestamp();
        encode(
            &Header::default(),
            &crate::auth::Claims {
                sub: user.to_string(),
                exp: now + 3600,
                iat: now,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn gateway() -> (Arc<RealtimeGateway>, EventBus, Arc<InMemoryAuditRepository>) {
        let bus = EventBus::new();
        let service = Arc::new(JobQueueService::new(
            Arc::new(InMemoryJobRepository::new()),
            Broker::new(BackoffPolicy::default()),
            Arc::new(InMemoryProgressCache::new()),
            bus.clone(),
        ));
        let manager = Arc::new(QueueManager::new(service, None));
        let audit = Arc::new(InMemoryAuditRepository::new());
        let config = RealtimeConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            allowed_origins: vec!["https://app.example.com".to_string()],
            auth_secret: SECRET.to_string(),
        };
        let gateway = Arc::new(RealtimeGateway::new(
            bus.clone(),
            config,
            manager,
            audit.clone(),
            None,
        ));
        (gateway, bus, audit)
    }

    fn frame(command: ClientCommand, data: serde_json::Value) -> ClientMessage {
        ClientMessage {
            command,
            data,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_authenticate_binds_user_and_sends_status() {
        let (gateway, _, _) = gateway();
        let (id, _rx) = gateway.registry().register().await;

        let replies = gateway
            .handle_client_message(
                id,
                frame(
                    ClientCommand::Authenticate,
                    json!({ "token": token_for("u1") }),
                ),
            )
            .await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].kind, ServerMessageKind::Authenticate);
        assert_eq!(replies[0].data["success"], true);
        assert_eq!(replies[1].kind, ServerMessageKind::SystemStatus);
        assert_eq!(gateway.registry().user_of(id).await.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_bad_token_sends_alert_and_stays_open() {
        let (gateway, _, _) = gateway();
        let (id, _rx) = gateway.registry().register().await;

        let replies = gateway
            .handle_client_message(
                id,
                frame(ClientCommand::Authenticate, json!({ "token": "garbage" })),
            )
            .await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, ServerMessageKind::Alert);
        // still registered, just unauthenticated
        assert_eq!(gateway.registry().connection_count().await, 1);
        assert!(gateway.registry().user_of(id).await.is_none());
    }

    #[tokio::test]
    async fn test_health_check_allowed_unauthenticated() {
        let (gateway, _, _) = gateway();
        let (id, _rx) = gateway.registry().register().await;

        let replies = gateway
            .handle_client_message(id, frame(ClientCommand::HealthCheck, json!({})))
            .await;
        assert_eq!(replies[0].kind, ServerMessageKind::HealthCheck);
    }

    #[tokio::test]
    async fn test_commands_require_authentication() {
        let (gateway, _, _) = gateway();
        let (id, _rx) = gateway.registry().register().await;

        for command in [
            ClientCommand::SystemStatus,
            ClientCommand::ActivityFeed,
            ClientCommand::Subscribe,
            ClientCommand::AnalyticsPing,
        ] {
            let replies = gateway
                .handle_client_message(id, frame(command, json!({ "channel": "analytics" })))
                .await;
            assert_eq!(replies[0].kind, ServerMessageKind::Alert, "{command:?}");
        }
    }

    #[tokio::test]
    async fn test_activity_feed_returns_user_entries() {
        let (gateway, _, audit) = gateway();
        audit
            .append(AuditEntry::new("u1", "notification", json!({ "m": "hi" })))
            .await
            .unwrap();
        audit
            .append(AuditEntry::new("u2", "notification", json!({ "m": "other" })))
            .await
            .unwrap();

        let (id, _rx) = gateway.registry().register().await;
        gateway
            .handle_client_message(
                id,
                frame(
                    ClientCommand::Authenticate,
                    json!({ "token": token_for("u1") }),
                ),
            )
            .await;

        let replies = gateway
            .handle_client_message(id, frame(ClientCommand::ActivityFeed, json!({})))
            .await;

        assert_eq!(replies[0].kind, ServerMessageKind::ActivityFeed);
        let entries = replies[0].data["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_and_analytics_pong() {
        let (gateway, _, audit) = gateway();
        let (id, _rx) = gateway.registry().register().await;
        gateway
            .handle_client_message(
                id,
                frame(
                    ClientCommand::Authenticate,
                    json!({ "token": token_for("u1") }),
                ),
            )
            .await;

        let replies = gateway
            .handle_client_message(
                id,
                frame(ClientCommand::Subscribe, json!({ "channel": "analytics" })),
            )
            .await;
        assert_eq!(replies[0].kind, ServerMessageKind::SubscriptionConfirmed);

        let replies = gateway
            .handle_client_message(
                id,
                frame(ClientCommand::AnalyticsPing, json!({ "activity": "view" })),
            )
            .await;
        assert_eq!(replies[0].kind, ServerMessageKind::AnalyticsPong);
        assert_eq!(audit.list_by_user("u1", 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_targets_only_the_named_user() {
        let (gateway, bus, _) = gateway();

        let (alice, mut alice_rx) = gateway.registry().register().await;
        let (bob, mut bob_rx) = gateway.registry().register().await;
        gateway.registry().authenticate(alice, "alice").await;
        gateway.registry().authenticate(bob, "bob").await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fanout = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.run_event_fanout(shutdown_rx).await })
        };

        // Give the fan-out a beat to subscribe
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(
            BusEvent::for_job(EventKind::JobCompleted, "job-1", json!({ "ok": true }))
                .with_user("alice"),
        );

        let received = tokio::time::timeout(Duration::from_secs(1), alice_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, ServerMessageKind::JobCompleted);
        assert!(bob_rx.try_recv().is_err());

        shutdown_tx.send(true).ok();
        fanout.await.unwrap();
    }

    #[tokio::test]
    async fn test_untargeted_event_reaches_all_authenticated() {
        let (gateway, bus, _) = gateway();

        let (alice, mut alice_rx) = gateway.registry().register().await;
        let (_anon, mut anon_rx) = gateway.registry().register().await;
        gateway.registry().authenticate(alice, "alice").await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fanout = {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move { gateway.run_event_fanout(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(BusEvent::new(EventKind::SystemAlert, json!({ "m": "hi" })));

        let received = tokio::time::timeout(Duration::from_secs(1), alice_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, ServerMessageKind::SystemAlert);
        assert!(anon_rx.try_recv().is_err());

        shutdown_tx.send(true).ok();
        fanout.await.unwrap();
    }

    #[test]
    fn test_origin_policy() {
        let (gateway, _, _) = gateway();

        assert!(gateway.origin_allowed(Some("https://app.example.com")));
        assert!(!gateway.origin_allowed(Some("https://evil.example.com")));
        // non-browser clients carry no Origin header
        assert!(gateway.origin_allowed(None));
    }
}
