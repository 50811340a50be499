use redis::aio::ConnectionManager;
use tracing::debug;

use crate::common::DatabaseError;

/// Check Redis health
///
/// Executes a `PING` command to verify the Redis connection is working.
///
/// # Returns
/// * `Ok(())` if Redis is healthy
/// * `Err(DatabaseError)` if the health check fails
pub async fn check_health(conn: &mut ConnectionManager) -> Result<(), DatabaseError> {
    debug!("Running Redis health check");

    let response: String = redis::cmd("PING").query_async(conn).await.map_err(|e| {
        DatabaseError::HealthCheckFailed(format!("Redis health check failed: {}", e))
    })?;

    if response != "PONG" {
        return Err(DatabaseError::HealthCheckFailed(format!(
            "Redis PING returned unexpected response: {}",
            response
        )));
    }

    debug!("Redis health check passed");
    Ok(())
}
