//! PostgreSQL database connector and utilities
//!
//! Provides connection management and PostgreSQL-specific helpers.

mod connector;
mod health;

pub use connector::{connect, connect_with_retry};
pub use health::check_health;

// Re-export SeaORM types for convenience
pub use sea_orm::{ConnectOptions, DatabaseConnection, DbErr};
