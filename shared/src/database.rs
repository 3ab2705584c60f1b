//! # PostgreSQL Connection Pool
//!
//! Database connection management using sqlx's async connection pool.
//!
//! ## Pool Configuration
//!
//! | Parameter | Default | Description |
//! |-----------|---------|-------------|
//! | `max_connections` | 10 | Maximum connections in pool |
//! | `min_connections` | 1 | Minimum connections to maintain |
//! | `connect_timeout` | 30s | Timeout for acquiring connection |
//! | `max_lifetime` | 30min | Recycle connections after this time |
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::database;
//! use shared::config::AppConfig;
//!
//! let config = AppConfig::from_env()?;
//! let pool = database::create_pool(&config.database).await?;
//!
//! // Health probe with a bounded deadline
//! database::ping(&pool, Duration::from_secs(2)).await?;
//! ```

use crate::config::DatabaseConfig;
use crate::errors::ApiError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Pool Creation
// =============================================================================

/// Creates a PostgreSQL connection pool.
///
/// This function establishes the initial connections and validates
/// connectivity. It should be called once at application startup.
///
/// ## Returns
///
/// A `PgPool` that can be cloned and shared across handlers.
/// `PgPool` is an `Arc` internally, so cloning is cheap.
///
/// ## Errors
///
/// Returns `ApiError::Database` if:
/// - Connection URL is invalid
/// - Database is unreachable
/// - Authentication fails
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, ApiError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_seconds = config.connect_timeout_seconds,
        max_lifetime_seconds = config.max_lifetime_seconds,
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        // How long to wait for a connection before timing out
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        // Recycle connections after this time (prevents stale connections)
        .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
        // Verify connection is valid before handing it out
        .test_before_acquire(true)
        .connect(&config.url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create database pool");
            ApiError::Database(e)
        })?;

    info!("Database connection pool created successfully");

    Ok(pool)
}

// =============================================================================
// Health Check
// =============================================================================

/// Verifies database connectivity within a bounded deadline.
///
/// Executes `SELECT 1` and treats both query failure and deadline overrun
/// as an unhealthy database. Health endpoints use a 2-second deadline so a
/// stalled database cannot stall the probe itself.
///
/// ## Errors
///
/// - `ApiError::Database` if the query fails
/// - `ApiError::Unavailable` if the deadline elapses first
pub async fn ping(pool: &PgPool, deadline: Duration) -> Result<(), ApiError> {
    let query = sqlx::query("SELECT 1").execute(pool);

    match tokio::time::timeout(deadline, query).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(ApiError::Database(e)),
        Err(_elapsed) => Err(ApiError::Unavailable {
            service: "postgres".to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    // Pool and ping tests require a live PostgreSQL instance and run as
    // integration tests against a test database.
}
