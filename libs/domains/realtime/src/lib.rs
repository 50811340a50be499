//! Realtime Domain
//!
//! The authenticated push channel: an axum websocket endpoint whose
//! connections receive per-user-filtered job lifecycle events from the bus,
//! plus on-demand system status, activity feed, and subscription commands.

pub mod auth;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod messages;

pub use auth::{AuthVerifier, Claims};
pub use connection::{ConnectionId, ConnectionRegistry};
pub use error::{RealtimeError, RealtimeResult};
pub use gateway::RealtimeGateway;
pub use handlers::{router, GatewayState};
pub use messages::{
    ActivityFeedRequest, ClientCommand, ClientMessage, ServerMessage, ServerMessageKind,
};
