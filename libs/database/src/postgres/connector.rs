use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::{info, log::LevelFilter};

use crate::common::{retry, retry_with_backoff, RetryConfig};

/// Connect to a PostgreSQL database with optimized connection pool settings
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(100)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Info); // SeaORM requires log::LevelFilter

    let db = Database::connect(opt).await?;

    info!("Successfully connected to PostgreSQL database");

    Ok(db)
}

/// Connect to PostgreSQL with automatic retry on failure
///
/// Uses exponential backoff to retry connection attempts during startup.
pub async fn connect_with_retry(
    database_url: &str,
    retry_config: Option<RetryConfig>,
) -> Result<DatabaseConnection, DbErr> {
    let url = database_url.to_string();

    match retry_config {
        Some(config) => retry_with_backoff(|| connect(&url), config).await,
        None => retry(|| connect(&url)).await,
    }
}
