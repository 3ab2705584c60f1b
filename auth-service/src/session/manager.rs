//! # Session Manager
//!
//! Session lifecycle policy over the [`SessionStore`] capability boundary.
//!
//! ## Lifecycle
//!
//! ```text
//! create_anonymous ──► anonymous session (no expiry)
//!         │
//!         │ migrate_to_user (exactly once, id preserved)
//!         ▼
//! authenticated session (expires after the configured TTL)
//!
//! create_authenticated ──► authenticated session directly
//! ```
//!
//! ## Per-User Cap
//!
//! `create_authenticated` enforces a configurable cap on live sessions per
//! user; when exceeded, the oldest authenticated session is evicted. This
//! bounds the damage of a leaked credential minting sessions in a loop.

use chrono::{Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{SessionError, SessionStore};
use crate::domain::Session;
use shared::config::SessionConfig;

// =============================================================================
// MANAGER
// =============================================================================

/// Session lifecycle manager.
///
/// # Thread Safety
///
/// Holds an `Arc<dyn SessionStore>`; cloning shares the store. All policy
/// state (TTL, cap) is immutable after construction.
#[derive(Clone)]
pub struct SessionManager {
    /// Backing store (in-memory or Redis)
    store: Arc<dyn SessionStore>,
    /// TTL assigned to authenticated sessions
    ttl: Duration,
    /// Cap on live authenticated sessions per user
    max_per_user: usize,
}

impl SessionManager {
    /// Creates a manager over a store with the configured policy.
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self {
            store,
            ttl: Duration::seconds(config.ttl_seconds as i64),
            max_per_user: config.max_per_user,
        }
    }

    /// Issues a fresh anonymous session.
    ///
    /// Anonymous sessions have no expiry; they live until migrated (or
    /// forever, for holders who never sign in).
    pub async fn create_anonymous(&self, username: &str) -> Result<Session, SessionError> {
        let session = Session {
            session_id: generate_session_id(),
            user_id: None,
            is_anonymous: true,
            username: Some(username.to_string()),
            created_at: Utc::now(),
            expires_at: None,
        };

        self.store.put(session.clone()).await?;

        debug!(session_id = %session.session_id, username = %username, "Anonymous session created");

        Ok(session)
    }

    /// Issues a fresh authenticated session for a user.
    ///
    /// Enforces the per-user cap: when the user already holds the maximum
    /// number of live sessions, the oldest one is evicted first.
    pub async fn create_authenticated(&self, user_id: Uuid) -> Result<Session, SessionError> {
        self.evict_over_cap(user_id).await?;

        let session = Session {
            session_id: generate_session_id(),
            user_id: Some(user_id),
            is_anonymous: false,
            username: None,
            created_at: Utc::now(),
            expires_at: Some(Utc::now() + self.ttl),
        };

        self.store.put(session.clone()).await?;

        debug!(session_id = %session.session_id, user_id = %user_id, "Authenticated session created");

        Ok(session)
    }

    /// Returns the session if it exists and has not expired.
    ///
    /// ## Errors
    ///
    /// - `NotFound` for unknown ids
    /// - `Expired` for sessions past their expiry
    pub async fn validate(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        if session.is_expired(Utc::now()) {
            return Err(SessionError::Expired);
        }

        Ok(session)
    }

    /// The session currently holding a claimed username, if any.
    ///
    /// Used by availability checks: an anonymous handle is taken from the
    /// moment its session exists.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<Session>, SessionError> {
        self.store.find_by_username(username).await
    }

    /// Migrates an anonymous session to a user.
    ///
    /// The session keeps its identifier - that is what preserves content
    /// authored while anonymous - flips to authenticated, and acquires the
    /// configured expiry. Idempotent when repeated with the same user;
    /// rejected with `AlreadyMigrated` for a different user.
    pub async fn migrate_to_user(
        &self,
        session_id: &str,
        user_id: Uuid,
    ) -> Result<Session, SessionError> {
        let expires_at = Some(Utc::now() + self.ttl);
        let session = self.store.update_user(session_id, user_id, expires_at).await?;

        info!(session_id = %session_id, user_id = %user_id, "Session migrated to user");

        Ok(session)
    }

    /// Removes sessions whose expiry has passed.
    ///
    /// Invoked by the periodic pruner task. Stores with native TTL
    /// handling report zero removals here.
    pub async fn prune_expired(&self) -> Result<u64, SessionError> {
        self.store.prune(Utc::now()).await
    }

    /// Evicts the oldest live sessions of a user until one slot is free.
    async fn evict_over_cap(&self, user_id: Uuid) -> Result<(), SessionError> {
        let now = Utc::now();
        let mut live: Vec<Session> = self
            .store
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .collect();

        if live.len() < self.max_per_user {
            return Ok(());
        }

        live.sort_by_key(|s| s.created_at);
        let excess = live.len() + 1 - self.max_per_user;

        for session in live.into_iter().take(excess) {
            info!(
                session_id = %session.session_id,
                user_id = %user_id,
                "Evicting oldest session over per-user cap"
            );
            self.store.delete(&session.session_id).await?;
        }

        Ok(())
    }
}

// =============================================================================
// SESSION IDS
// =============================================================================

/// Generates a cryptographically random session identifier.
///
/// 16 bytes of CSPRNG output, hex-encoded to 32 characters.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// =============================================================================
// TESTS
// =============================================================================
