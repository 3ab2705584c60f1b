//! # Redis Client
//!
//! Async Redis client used as the networked backend for the session store.
//!
//! ## Why Redis?
//!
//! Sessions are small, hot, and TTL-bounded - exactly the shape Redis is
//! good at. The client wraps a `ConnectionManager`, which reconnects
//! automatically, so callers never hold a broken connection.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::redis_client::RedisClient;
//!
//! let redis = RedisClient::new("redis://localhost:6379").await?;
//!
//! // Typed JSON helpers
//! redis.set("config:flag", &true, Some(Duration::from_secs(60))).await?;
//! let flag: Option<bool> = redis.get("config:flag").await?;
//!
//! // Raw command access for hash/set operations
//! let mut conn = redis.connection();
//! conn.hset_nx::<_, _, _, bool>("session:abc", "user_id", "...").await?;
//! ```

use crate::errors::ApiError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Redis Client
// =============================================================================

/// Async Redis client with automatic reconnection.
///
/// ## Thread Safety
///
/// The client is `Clone + Send + Sync`. Cloning is cheap (just an Arc
/// clone). Each operation uses an async connection from the manager.
#[derive(Clone)]
pub struct RedisClient {
    /// Connection manager for automatic reconnection
    conn: ConnectionManager,
}

impl RedisClient {
    /// Creates a new Redis client and establishes the connection.
    ///
    /// ## Errors
    ///
    /// Returns `ApiError::Redis` if the URL is invalid, the server is
    /// unreachable, or authentication fails.
    pub async fn new(url: &str) -> Result<Self, ApiError> {
        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url).map_err(ApiError::Redis)?;

        let conn = ConnectionManager::new(client).await.map_err(ApiError::Redis)?;

        info!("Redis connection established");

        Ok(Self { conn })
    }

    /// Returns a cloned connection handle for raw command access.
    ///
    /// `ConnectionManager` multiplexes internally, so cloning per call is
    /// the intended usage pattern.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // =========================================================================
    // Typed JSON Helpers
    // =========================================================================

    /// Stores a value with optional TTL. The value is serialized to JSON.
    pub async fn set<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), ApiError> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| ApiError::Internal { message: e.to_string() })?;

        let mut conn = self.conn.clone();

        match ttl {
            Some(duration) => {
                conn.set_ex::<_, _, ()>(key, &serialized, duration.as_secs())
                    .await
                    .map_err(ApiError::Redis)?;
            }
            None => {
                conn.set::<_, _, ()>(key, &serialized)
                    .await
                    .map_err(ApiError::Redis)?;
            }
        }

        Ok(())
    }

    /// Retrieves and deserializes a value.
    ///
    /// ## Returns
    ///
    /// - `Ok(Some(value))` - key exists and was deserialized
    /// - `Ok(None)` - key doesn't exist
    pub async fn get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ApiError> {
        let mut conn = self.conn.clone();

        let value: Option<String> = conn.get(key).await.map_err(ApiError::Redis)?;

        match value {
            Some(s) => {
                let deserialized = serde_json::from_str(&s)
                    .map_err(|e| ApiError::Internal { message: e.to_string() })?;
                Ok(Some(deserialized))
            }
            None => Ok(None),
        }
    }

    /// Deletes a key. Missing keys are not an error.
    pub async fn delete(&self, key: &str) -> Result<(), ApiError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(ApiError::Redis)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
