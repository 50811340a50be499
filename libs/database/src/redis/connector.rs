use redis::aio::ConnectionManager;
use redis::Client;
use tracing::info;

use crate::common::{retry, retry_with_backoff, RetryConfig};

/// Connect to Redis and return a ConnectionManager
///
/// The ConnectionManager automatically handles connection failures and reconnections.
///
/// # Arguments
/// * `url` - Redis connection string (e.g., "redis://127.0.0.1:6379")
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    info!("Attempting to connect to Redis at {}", url);

    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    // Verify connection with PING
    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Successfully connected to Redis");
    Ok(manager)
}

/// Connect to Redis with automatic retry on failure
///
/// Uses exponential backoff to retry connection attempts. Useful for
/// handling transient network issues during startup.
///
/// # Example
/// ```ignore
/// use database::redis::connect_with_retry;
/// use database::common::RetryConfig;
///
/// let config = RetryConfig::new()
///     .with_max_retries(5)
///     .with_initial_delay(500);
/// let conn = connect_with_retry("redis://127.0.0.1:6379", Some(config)).await?;
/// ```
pub async fn connect_with_retry(
    url: &str,
    retry_config: Option<RetryConfig>,
) -> redis::RedisResult<ConnectionManager> {
    let url_owned = url.to_string();

    match retry_config {
        Some(config) => retry_with_backoff(|| connect(&url_owned), config).await,
        None => retry(|| connect(&url_owned)).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires actual Redis
    async fn test_connect() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let result = connect(&redis_url).await;
        assert!(result.is_ok());
    }
}
