//! Connection registry.
//!
//! Each websocket connection is owned by one reader task and one writer
//! task; the registry holds the writer's sender plus the connection's
//! authentication and subscription state. Sends are non-blocking: a full or
//! closed outbound queue marks the connection dead and it is pruned.

use crate::messages::ServerMessage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound queue depth per connection.
pub const OUTBOUND_BUFFER: usize = 64;

struct ConnectionState {
    user_id: Option<String>,
    channels: HashSet<String>,
    last_activity: Instant,
    sender: mpsc::Sender<ServerMessage>,
}

/// Registry of live connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionState>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new unauthenticated connection; returns its id and the
    /// receiving end of its outbound queue.
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let id = Uuid::new_v4();
        self.connections.write().await.insert(
            id,
            ConnectionState {
                user_id: None,
                channels: HashSet::new(),
                last_activity: Instant::now(),
                sender,
            },
        );
        debug!(connection_id = %id, "Registered connection");
        (id, receiver)
    }

    pub async fn unregister(&self, id: ConnectionId) {
        if self.connections.write().await.remove(&id).is_some() {
            debug!(connection_id = %id, "Unregistered connection");
        }
    }

    /// Bind an authenticated user to the connection.
    pub async fn authenticate(&self, id: ConnectionId, user_id: impl Into<String>) -> bool {
        match self.connections.write().await.get_mut(&id) {
            Some(state) => {
                state.user_id = Some(user_id.into());
                state.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    pub async fn user_of(&self, id: ConnectionId) -> Option<String> {
        self.connections.read().await.get(&id)?.user_id.clone()
    }

    /// Record client activity on the connection.
    pub async fn touch(&self, id: ConnectionId) {
        if let Some(state) = self.connections.write().await.get_mut(&id) {
            state.last_activity = Instant::now();
        }
    }

    pub async fn subscribe(&self, id: ConnectionId, channel: impl Into<String>) -> bool {
        match self.connections.write().await.get_mut(&id) {
            Some(state) => {
                state.channels.insert(channel.into());
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe(&self, id: ConnectionId, channel: &str) -> bool {
        match self.connections.write().await.get_mut(&id) {
            Some(state) => state.channels.remove(channel),
            None => false,
        }
    }

    /// Queue a message to one connection. Returns false when the
    /// connection is gone or its queue is full (it will be pruned).
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&id) {
            Some(state) => state.sender.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Deliver a message to every connection authenticated as `user_id`.
    pub async fn send_to_user(&self, user_id: &str, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, state) in connections.iter() {
                if state.user_id.as_deref() == Some(user_id) {
                    if state.sender.try_send(message.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(*id);
                    }
                }
            }
        }
        self.prune(dead).await;
        delivered
    }

    /// Deliver a message to every authenticated connection; with a channel,
    /// only to connections subscribed to it.
    pub async fn broadcast_authenticated(
        &self,
        message: &ServerMessage,
        channel: Option<&str>,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, state) in connections.iter() {
                if state.user_id.is_none() {
                    continue;
                }
                if let Some(channel) = channel {
                    if !state.channels.contains(channel) {
                        continue;
                    }
                }
                if state.sender.try_send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }
        self.prune(dead).await;
        delivered
    }

    /// Connections with no activity for at least `idle`.
    pub async fn idle_connections(&self, idle: Duration) -> Vec<ConnectionId> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .filter(|(_, state)| state.last_activity.elapsed() >= idle)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn authenticated_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|state| state.user_id.is_some())
            .count()
    }

    async fn prune(&self, dead: Vec<ConnectionId>) {
        if dead.is_empty() {
            return;
        }
        let mut connections = self.connections.write().await;
        for id in dead {
            connections.remove(&id);
            debug!(connection_id = %id, "Pruned unwritable connection");
        }
    }
}
