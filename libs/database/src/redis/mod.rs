//! Redis database connector and utilities
//!
//! Provides connection management and Redis-specific helpers.

mod connector;
mod health;

pub use connector::{connect, connect_with_retry};
pub use health::check_health;

// Re-export redis types for convenience
pub use redis::aio::ConnectionManager;
pub use redis::{AsyncCommands, Client, RedisResult};
