//! # Session Store
//!
//! Opaque persistence of session records behind a capability boundary.
//!
//! ## Contract
//!
//! ```text
//! put(session) | get(id) | delete(id) | update_user(id, user_id, expiry)
//! list_for_user(user_id) | prune(before)
//! ```
//!
//! Two implementations exist behind the same trait so swapping is purely a
//! composition change in `main.rs`:
//!
//! | Implementation | Backing | Use |
//! |----------------|---------|-----|
//! | [`InMemorySessionStore`] | `Mutex<HashMap>` | development, tests, single instance |
//! | [`RedisSessionStore`](super::redis_store::RedisSessionStore) | Redis hashes | production |
//!
//! ## Atomicity
//!
//! `update_user` is the migration primitive and must be atomic relative to
//! `get`: a concurrent reader sees the session either fully anonymous or
//! fully migrated, never in between. The in-memory store gets this from its
//! single mutex; the Redis store from a single-command `HSETNX`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::Session;
use shared::errors::ApiError;

// =============================================================================
// ERRORS
// =============================================================================

/// Session store and lifecycle failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with the given id.
    #[error("session not found")]
    NotFound,

    /// The session exists but has passed its expiry.
    #[error("session expired")]
    Expired,

    /// Migration was attempted on a session already bound to a different
    /// user.
    #[error("session already migrated")]
    AlreadyMigrated,

    /// Underlying Redis failure.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    /// A stored record could not be decoded.
    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => ApiError::NotFound {
                resource: "session".to_string(),
            },
            SessionError::Expired => ApiError::Unauthenticated,
            SessionError::AlreadyMigrated => ApiError::AlreadyExists {
                resource: "session owner".to_string(),
            },
            SessionError::Redis(e) => ApiError::Redis(e),
            SessionError::Corrupt(message) => ApiError::Internal { message },
        }
    }
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Capability boundary over session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores (or replaces) a session record.
    async fn put(&self, session: Session) -> Result<(), SessionError>;

    /// Fetches a session by id. Expiry is *not* evaluated here; that is
    /// lifecycle policy and lives in the manager.
    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    /// Removes a session. Missing sessions are not an error.
    async fn delete(&self, session_id: &str) -> Result<(), SessionError>;

    /// Binds an anonymous session to a user, atomically relative to `get`.
    ///
    /// - unbound session: binds it, flips `is_anonymous`, assigns `expires_at`
    /// - already bound to the same user: idempotent, returns the record
    /// - bound to a different user: `AlreadyMigrated`
    ///
    /// The session id is preserved in every case.
    async fn update_user(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Session, SessionError>;

    /// All sessions currently bound to a user (for cap enforcement).
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError>;

    /// The session holding a claimed username, if any. Anonymous handles
    /// live on session records; this is what makes a claimed handle visible
    /// to availability checks.
    async fn find_by_username(&self, username: &str) -> Result<Option<Session>, SessionError>;

    /// Removes sessions whose expiry lies before `before`.
    /// Returns how many were removed. Stores with native TTL may no-op.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, SessionError>;
}

// =============================================================================
// IN-MEMORY REFERENCE IMPLEMENTATION
// =============================================================================

/// Reference [`SessionStore`] backed by a mutex-guarded map.
///
/// A single mutex is deliberate: session operations are O(1) and short, and
/// the one lock is what makes `update_user` linearizable with `get` without
/// further machinery. Production deployments use the Redis store instead.
#[derive(Default)]
pub struct InMemorySessionStore {
    /// All sessions, keyed by session id
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        Ok(sessions.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        sessions.remove(session_id);
        Ok(())
    }

    async fn update_user(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");

        let session = sessions.get_mut(session_id).ok_or(SessionError::NotFound)?;

        match session.user_id {
            None => {
                session.user_id = Some(user_id);
                session.is_anonymous = false;
                session.expires_at = expires_at;
            }
            Some(existing) if existing == user_id => {
                // Idempotent repeat; keep the expiry assigned on first
                // migration.
            }
            Some(_) => return Err(SessionError::AlreadyMigrated),
        }

        Ok(session.clone())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        Ok(sessions
            .values()
            .filter(|s| s.user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.lock().expect("session map poisoned");
        Ok(sessions
            .values()
            .find(|s| s.username.as_deref() == Some(username))
            .cloned())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, SessionError> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let len_before = sessions.len();
        sessions.retain(|_, s| match s.expires_at {
            Some(expires_at) => expires_at >= before,
            None => true,
        });
        Ok((len_before - sessions.len()) as u64)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymous_session(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            user_id: None,
            is_anonymous: true,
            username: Some("wanderer".to_string()),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let store = InMemorySessionStore::new();
        let session = anonymous_session("s1");

        store.put(session.clone()).await.unwrap();
        assert_eq!(store.get("s1").await.unwrap(), Some(session));

        store.delete("s1").await.unwrap();
        assert_eq!(store.get("s1").await.unwrap(), None);

        // Deleting again is not an error
        store.delete("s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_user_binds_once() {
        let store = InMemorySessionStore::new();
        store.put(anonymous_session("s1")).await.unwrap();

        let user = Uuid::new_v4();
        let expiry = Some(Utc::now() + chrono::Duration::days(7));

        let migrated = store.update_user("s1", user, expiry).await.unwrap();
        assert_eq!(migrated.user_id, Some(user));
        assert!(!migrated.is_anonymous);
        assert_eq!(migrated.expires_at, expiry);
        // Session id is preserved
        assert_eq!(migrated.session_id, "s1");
    }

    #[tokio::test]
    async fn test_update_user_is_idempotent_for_same_user() {
        let store = InMemorySessionStore::new();
        store.put(anonymous_session("s1")).await.unwrap();

        let user = Uuid::new_v4();
        let expiry = Some(Utc::now() + chrono::Duration::days(7));

        let first = store.update_user("s1", user, expiry).await.unwrap();
        let second = store
            .update_user("s1", user, Some(Utc::now() + chrono::Duration::days(30)))
            .await
            .unwrap();

        // Second call keeps the first migration's expiry
        assert_eq!(second.expires_at, first.expires_at);
    }

    #[tokio::test]
    async fn test_update_user_rejects_different_user() {
        let store = InMemorySessionStore::new();
        store.put(anonymous_session("s1")).await.unwrap();

        store.update_user("s1", Uuid::new_v4(), None).await.unwrap();

        let result = store.update_user("s1", Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(SessionError::AlreadyMigrated)));
    }

    #[tokio::test]
    async fn test_update_user_missing_session() {
        let store = InMemorySessionStore::new();
        let result = store.update_user("ghost", Uuid::new_v4(), None).await;
        assert!(matches!(result, Err(SessionError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_for_user() {
        let store = InMemorySessionStore::new();
        let user = Uuid::new_v4();

        for id in ["s1", "s2", "s3"] {
            store.put(anonymous_session(id)).await.unwrap();
        }
        store.update_user("s1", user, None).await.unwrap();
        store.update_user("s3", user, None).await.unwrap();

        let mut owned: Vec<String> = store
            .list_for_user(user)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        owned.sort();

        assert_eq!(owned, vec!["s1", "s3"]);
    }

    #[tokio::test]
    async fn test_find_by_username() {
        let store = InMemorySessionStore::new();
        store.put(anonymous_session("s1")).await.unwrap();

        let found = store.find_by_username("wanderer").await.unwrap();
        assert_eq!(found.map(|s| s.session_id), Some("s1".to_string()));

        assert!(store.find_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_removes_only_expired() {
        let store = InMemorySessionStore::new();

        // Anonymous session: no expiry, never pruned
        store.put(anonymous_session("anon")).await.unwrap();

        let mut expired = anonymous_session("expired");
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        store.put(expired).await.unwrap();

        let mut live = anonymous_session("live");
        live.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        store.put(live).await.unwrap();

        let removed = store.prune(Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("anon").await.unwrap().is_some());
        assert!(store.get("live").await.unwrap().is_some());
        assert!(store.get("expired").await.unwrap().is_none());
    }
}
