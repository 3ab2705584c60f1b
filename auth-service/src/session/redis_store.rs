//! # Redis Session Store
//!
//! Production [`SessionStore`] backed by Redis.
//!
//! ## Data Layout
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `session:{id}` | hash | session fields (`user_id` absent while anonymous) |
//! | `user_sessions:{uuid}` | set | session ids bound to the user |
//!
//! Authenticated sessions carry a Redis TTL matching their `expires_at`, so
//! expiry cleanup is native and [`prune`](SessionStore::prune) is a no-op.
//! Anonymous sessions have no TTL and live until migrated.
//!
//! ## Migration Atomicity
//!
//! `update_user` binds the session with a single `HSETNX session:{id}
//! user_id <uuid>`. One command, one winner: a concurrent reader either
//! sees the field set (migrated - `is_anonymous` is *derived* from the
//! field's presence) or not set (still anonymous). When `HSETNX` loses, the
//! stored value decides between the idempotent repeat and
//! `AlreadyMigrated`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::collections::HashMap;
use uuid::Uuid;

use super::store::{SessionError, SessionStore};
use crate::domain::Session;
use shared::redis_client::RedisClient;

/// Hash key prefix for session records.
const SESSION_PREFIX: &str = "session:";

/// Set key prefix for the per-user session index.
const USER_SESSIONS_PREFIX: &str = "user_sessions:";

/// Hash mapping claimed usernames to the session holding them.
const USERNAME_INDEX_KEY: &str = "session_usernames";

// =============================================================================
// STORE
// =============================================================================

/// Redis-backed [`SessionStore`].
#[derive(Clone)]
pub struct RedisSessionStore {
    /// Shared Redis client (connection manager inside)
    client: RedisClient,
}

impl RedisSessionStore {
    /// Creates a store over an established Redis client.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn session_key(session_id: &str) -> String {
        format!("{}{}", SESSION_PREFIX, session_id)
    }

    fn user_key(user_id: Uuid) -> String {
        format!("{}{}", USER_SESSIONS_PREFIX, user_id)
    }

    /// Hash representation of a session.
    ///
    /// `is_anonymous` is not stored: it is derived from the presence of the
    /// `user_id` field, which is what keeps `HSETNX` migration atomic.
    fn to_hash(session: &Session) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("session_id", session.session_id.clone()),
            ("created_at", session.created_at.to_rfc3339()),
        ];
        if let Some(user_id) = session.user_id {
            fields.push(("user_id", user_id.to_string()));
        }
        if let Some(username) = &session.username {
            fields.push(("username", username.clone()));
        }
        if let Some(expires_at) = session.expires_at {
            fields.push(("expires_at", expires_at.to_rfc3339()));
        }
        fields
    }

    /// Parses a hash back into a session.
    fn from_hash(hash: HashMap<String, String>) -> Result<Session, SessionError> {
        let session_id = hash
            .get("session_id")
            .cloned()
            .ok_or_else(|| SessionError::Corrupt("missing session_id".to_string()))?;

        let created_at = hash
            .get("created_at")
            .ok_or_else(|| SessionError::Corrupt("missing created_at".to_string()))
            .and_then(|raw| parse_timestamp(raw))?;

        let user_id = match hash.get("user_id") {
            Some(raw) => Some(
                Uuid::parse_str(raw)
                    .map_err(|e| SessionError::Corrupt(format!("bad user_id: {}", e)))?,
            ),
            None => None,
        };

        let expires_at = match hash.get("expires_at") {
            Some(raw) => Some(parse_timestamp(raw)?),
            None => None,
        };

        Ok(Session {
            session_id,
            is_anonymous: user_id.is_none(),
            user_id,
            username: hash.get("username").cloned(),
            created_at,
            expires_at,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SessionError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SessionError::Corrupt(format!("bad timestamp: {}", e)))
}

/// Seconds until `expires_at`, clamped to at least one so a record that is
/// already past due still gets a TTL instead of living forever.
fn ttl_seconds(expires_at: DateTime<Utc>) -> i64 {
    (expires_at - Utc::now()).num_seconds().max(1)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: Session) -> Result<(), SessionError> {
        let key = Self::session_key(&session.session_id);
        let fields = Self::to_hash(&session);

        let mut pipe = redis::pipe();
        pipe.atomic();
        // Replace wholesale so stale fields from an earlier record are gone
        pipe.del(&key).ignore();
        pipe.hset_multiple(&key, &fields).ignore();

        if let Some(expires_at) = session.expires_at {
            pipe.expire(&key, ttl_seconds(expires_at)).ignore();
        }
        if let Some(user_id) = session.user_id {
            pipe.sadd(Self::user_key(user_id), &session.session_id).ignore();
        }
        if let Some(username) = &session.username {
            pipe.hset(USERNAME_INDEX_KEY, username, &session.session_id).ignore();
        }

        let mut conn = self.client.connection();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let mut conn = self.client.connection();
        let hash: HashMap<String, String> =
            conn.hgetall(Self::session_key(session_id)).await?;

        if hash.is_empty() {
            return Ok(None);
        }

        Self::from_hash(hash).map(Some)
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        // Fetch first so the per-user index can be maintained
        let existing = self.get(session_id).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(Self::session_key(session_id)).ignore();
        if let Some(session) = existing {
            if let Some(user_id) = session.user_id {
                pipe.srem(Self::user_key(user_id), session_id).ignore();
            }
            if let Some(username) = &session.username {
                pipe.hdel(USERNAME_INDEX_KEY, username).ignore();
            }
        }

        let mut conn = self.client.connection();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn update_user(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Session, SessionError> {
        let key = Self::session_key(session_id);
        let mut conn = self.client.connection();

        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Err(SessionError::NotFound);
        }

        // Single-command migration: exactly one caller sets the field.
        let won: bool = conn.hset_nx(&key, "user_id", user_id.to_string()).await?;

        if won {
            let mut pipe = redis::pipe();
            pipe.atomic();
            if let Some(expires_at) = expires_at {
                pipe.hset(&key, "expires_at", expires_at.to_rfc3339()).ignore();
                pipe.expire(&key, ttl_seconds(expires_at)).ignore();
            }
            pipe.sadd(Self::user_key(user_id), session_id).ignore();
            pipe.query_async::<()>(&mut conn).await?;
        } else {
            let existing: Option<String> = conn.hget(&key, "user_id").await?;
            match existing {
                Some(raw) if raw == user_id.to_string() => {
                    // Idempotent repeat; keep the first migration's expiry
                }
                _ => return Err(SessionError::AlreadyMigrated),
            }
        }

        self.get(session_id).await?.ok_or(SessionError::NotFound)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        let mut conn = self.client.connection();
        let ids: Vec<String> = conn.smembers(Self::user_key(user_id)).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            // TTL-expired sessions drop out of the hash space but linger in
            // the index; skip them here
            if let Some(session) = self.get(&id).await? {
                sessions.push(session);
            }
        }

        Ok(sessions)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Session>, SessionError> {
        let mut conn = self.client.connection();
        let session_id: Option<String> = conn.hget(USERNAME_INDEX_KEY, username).await?;

        match session_id {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    async fn prune(&self, _before: DateTime<Utc>) -> Result<u64, SessionError> {
        // Redis TTLs expire authenticated sessions natively
        Ok(0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
