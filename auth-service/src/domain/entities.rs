//! # Identity Domain Entities
//!
//! Core domain entities for users, sessions, and provider identities.
//! Entities represent persistent business objects; session records live in
//! the session store, user records in PostgreSQL.
//!
//! ## Entity Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Domain Entities                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────┐          ┌────────────────────────┐            │
//! │  │        User         │          │        Session         │            │
//! │  ├─────────────────────┤          ├────────────────────────┤            │
//! │  │ - user_id (PK)      │◄─────────│ - session_id           │            │
//! │  │ - email (unique)    │ 0..1     │ - user_id (null = anon)│            │
//! │  │ - username (unique) │          │ - is_anonymous         │            │
//! │  │ - display_name      │          │ - expires_at (opt)     │            │
//! │  │ - status            │          └────────────────────────┘            │
//! │  │ - metadata (JSONB)  │                                                │
//! │  └─────────────────────┘          ┌────────────────────────┐            │
//! │                                   │        UserInfo        │            │
//! │                                   │  (normalized provider  │            │
//! │                                   │   authentication result)│           │
//! │                                   └────────────────────────┘            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Anonymous Subjects
//!
//! An anonymous holder is identified by a *session id*, not a user id. The
//! two identifier spaces are kept apart by [`SubjectId`], so code that
//! expects a user id cannot silently receive a session id.
//!
//! ## Session Migration
//!
//! An anonymous session may acquire a `user_id` exactly once. The session
//! id survives the transition, which is what keeps content authored while
//! anonymous attached to the new account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// USER STATUS
// =============================================================================

/// Account lifecycle status with monotone transitions.
///
/// ```text
/// Pending ──► Active ──► Disabled
/// ```
///
/// A status never moves backwards; `can_transition_to` encodes the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Created but not yet activated
    Pending,
    /// Normal account
    Active,
    /// Locked out; authentication is refused
    Disabled,
}

impl UserStatus {
    /// Parses a status from its storage representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Whether moving to `next` respects the monotone order.
    /// Staying in place is always allowed.
    pub fn can_transition_to(&self, next: Self) -> bool {
        fn rank(status: UserStatus) -> u8 {
            match status {
                UserStatus::Pending => 0,
                UserStatus::Active => 1,
                UserStatus::Disabled => 2,
            }
        }
        rank(next) >= rank(*self)
    }
}

// =============================================================================
// USER ENTITY
// =============================================================================

/// Complete user entity as stored in the database.
///
/// Maps directly to the `users` table. Both `email` and `username` are
/// nullable but globally unique when present (partial unique indexes).
/// `metadata` carries provider linkage and verification flags as JSONB,
/// e.g. `{"provider": "google", "provider_id": "...", "email_verified": true}`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (UUID v4); never changes once assigned
    pub user_id: Uuid,
    /// Email address; unique when present
    pub email: Option<String>,
    /// Public handle; unique when present
    pub username: Option<String>,
    /// Name shown to other users
    pub display_name: String,
    /// Given name, when a provider supplied one
    pub first_name: Option<String>,
    /// Family name, when a provider supplied one
    pub last_name: Option<String>,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Account status: "pending", "active", or "disabled"
    pub status: String,
    /// Provider linkage and verification flags
    pub metadata: serde_json::Value,
    /// Timestamp of last successful authentication
    pub last_login_at: Option<DateTime<Utc>>,
    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Typed view of the status column.
    pub fn status(&self) -> Option<UserStatus> {
        UserStatus::from_str(&self.status)
    }

    /// Whether authentication must be refused for this account.
    pub fn is_disabled(&self) -> bool {
        self.status() == Some(UserStatus::Disabled)
    }
}

// =============================================================================
// USER PROFILE (SAFE FOR API RESPONSES)
// =============================================================================

/// Public user profile for API responses.
///
/// Excludes `metadata` (provider linkage is internal) and `updated_at`.
/// Serialized as camelCase for the web and mobile clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Unique user identifier
    pub user_id: Uuid,
    /// Email address
    pub email: Option<String>,
    /// Public handle
    pub username: Option<String>,
    /// Name shown to other users
    pub display_name: String,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Account status
    pub status: String,
    /// Last authentication timestamp
    pub last_login_at: Option<DateTime<Utc>>,
    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            first_name: user.first_name,
            last_name: user.last_name,
            avatar_url: user.avatar_url,
            status: user.status,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

// =============================================================================
// NEW USER
// =============================================================================

/// Data required to create a user row.
///
/// Built by the orchestrator from a provider's [`UserInfo`]; the store
/// assigns `user_id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Email address (unique when present)
    pub email: Option<String>,
    /// Public handle (unique when present)
    pub username: Option<String>,
    /// Name shown to other users
    pub display_name: String,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub last_name: Option<String>,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Initial status ("active" for provider-verified identities)
    pub status: String,
    /// Provider linkage and verification flags
    pub metadata: serde_json::Value,
}

// =============================================================================
// SESSION
// =============================================================================

/// A binding between a credential holder and a subject.
///
/// Invariants:
/// - `user_id.is_none()` exactly when `is_anonymous`
/// - `expires_at.is_none()` exactly when `is_anonymous`
/// - an anonymous session migrates to a user at most once, keeping its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier, 32 hex characters of CSPRNG output
    pub session_id: String,
    /// Owning user; `None` while anonymous
    pub user_id: Option<Uuid>,
    /// Whether the session is anonymous
    pub is_anonymous: bool,
    /// Handle claimed by an anonymous holder
    pub username: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiry; `None` while anonymous (anonymous sessions live until migrated)
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// The subject this session authenticates.
    pub fn subject(&self) -> SubjectId {
        match self.user_id {
            Some(user_id) => SubjectId::User(user_id),
            None => SubjectId::Session(self.session_id.clone()),
        }
    }

    /// Whether the session has passed its expiry.
    /// Anonymous sessions never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}

// =============================================================================
// SUBJECT ID
// =============================================================================

/// A tagged subject identifier.
///
/// Anonymous holders are identified by their session id where a user id
/// would normally stand. Keeping the tag in the type prevents the two
/// identifier spaces from being confused downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectId {
    /// A registered user
    User(Uuid),
    /// An anonymous session standing in as the subject
    Session(String),
}

impl SubjectId {
    /// The user id, when the subject is a registered user.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            SubjectId::User(id) => Some(*id),
            SubjectId::Session(_) => None,
        }
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectId::User(id) => write!(f, "user:{}", id),
            SubjectId::Session(id) => write!(f, "session:{}", id),
        }
    }
}

// =============================================================================
// USER INFO
// =============================================================================

/// Normalized output of any provider's authentication step.
///
/// Whatever a provider returns natively (Google userinfo, tokeninfo claims,
/// an anonymous session grant) is flattened into this shape before the
/// orchestrator sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    /// Provider-local identifier. For the anonymous provider this is the
    /// *session id*, not a user id.
    pub id: String,
    /// Email address; empty when the provider has none
    pub email: String,
    /// Proposed handle; falls back to the email when absent
    pub username: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Full display name
    pub name: String,
    /// Avatar URL
    pub picture: String,
    /// Whether the provider vouches for the email
    pub email_verified: bool,
    /// When verification happened, if the provider reports it
    pub verified_at: Option<DateTime<Utc>>,
    /// Name of the provider that produced this record
    pub provider: String,
    /// Provider-local extras
    pub metadata: serde_json::Value,
}

impl UserInfo {
    /// Best display name available: full name, else first+last, else the
    /// username.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        let joined = format!("{} {}", self.first_name, self.last_name);
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_string();
        }
        self.username.clone()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotone() {
        assert!(UserStatus::Pending.can_transition_to(UserStatus::Active));
        assert!(UserStatus::Active.can_transition_to(UserStatus::Disabled));
        assert!(UserStatus::Pending.can_transition_to(UserStatus::Disabled));

        assert!(!UserStatus::Active.can_transition_to(UserStatus::Pending));
        assert!(!UserStatus::Disabled.can_transition_to(UserStatus::Active));

        // Staying in place is allowed
        assert!(UserStatus::Active.can_transition_to(UserStatus::Active));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [UserStatus::Pending, UserStatus::Active, UserStatus::Disabled] {
            assert_eq!(UserStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(UserStatus::from_str("frozen"), None);
    }

    #[test]
    fn test_session_subject_tagging() {
        let anon = Session {
            session_id: "abc123".to_string(),
            user_id: None,
            is_anonymous: true,
            username: Some("wanderer".to_string()),
            created_at: Utc::now(),
            expires_at: None,
        };
        assert_eq!(anon.subject(), SubjectId::Session("abc123".to_string()));
        assert_eq!(anon.subject().user_id(), None);

        let uid = Uuid::new_v4();
        let named = Session { user_id: Some(uid), is_anonymous: false, ..anon };
        assert_eq!(named.subject(), SubjectId::User(uid));
        assert_eq!(named.subject().user_id(), Some(uid));
    }

    #[test]
    fn test_anonymous_sessions_never_expire() {
        let session = Session {
            session_id: "abc".to_string(),
            user_id: None,
            is_anonymous: true,
            username: None,
            created_at: Utc::now() - chrono::Duration::days(400),
            expires_at: None,
        };
        assert!(!session.is_expired(Utc::now()));
    }

    #[test]
    fn test_authenticated_sessions_expire() {
        let session = Session {
            session_id: "abc".to_string(),
            user_id: Some(Uuid::new_v4()),
            is_anonymous: false,
            username: None,
            created_at: Utc::now() - chrono::Duration::days(8),
            expires_at: Some(Utc::now() - chrono::Duration::days(1)),
        };
        assert!(session.is_expired(Utc::now()));
    }

    #[test]
    fn test_user_info_display_name_fallbacks() {
        let mut info = UserInfo {
            id: "g-123".to_string(),
            email: "a@example.com".to_string(),
            username: "a@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            name: "Ada Lovelace".to_string(),
            picture: String::new(),
            email_verified: true,
            verified_at: None,
            provider: "google".to_string(),
            metadata: serde_json::json!({}),
        };

        assert_eq!(info.display_name(), "Ada Lovelace");

        info.name.clear();
        assert_eq!(info.display_name(), "Ada Lovelace");

        info.first_name.clear();
        info.last_name.clear();
        assert_eq!(info.display_name(), "a@example.com");
    }
}
