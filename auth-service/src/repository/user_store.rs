//! # User Store
//!
//! Identity persistence contract and its PostgreSQL implementation.
//!
//! ## Contract
//!
//! The orchestrator consumes the narrow [`UserStore`] trait and never
//! composes multi-step transactions across it - each call is transactional
//! on its own. That keeps the contract implementable by stores without
//! cross-call transactions and makes races explicit (see the
//! duplicate-email retry in the orchestrator).
//!
//! ## Query Patterns
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────────────────┐
//! │ Pattern          │ Example                                          │
//! ├──────────────────┼──────────────────────────────────────────────────┤
//! │ Returning        │ INSERT ... RETURNING * (to get generated fields) │
//! │ Parameterized    │ Always use $1, $2 (never string interpolation)   │
//! │ Conflict mapping │ unique-violation constraint name → typed error   │
//! └──────────────────┴──────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{NewUser, User};
use shared::errors::ApiError;

// =============================================================================
// ERRORS
// =============================================================================

/// Typed persistence failures.
///
/// The duplicate variants exist so the orchestrator can distinguish a lost
/// creation race (retry the lookup) from a taken username (report the
/// conflict).
#[derive(Debug, Error)]
pub enum UserStoreError {
    /// Another row already holds this email.
    #[error("duplicate email")]
    DuplicateEmail,

    /// Another row already holds this username.
    #[error("duplicate username")]
    DuplicateUsername,

    /// No user matched the lookup.
    #[error("user not found")]
    NotFound,

    /// Underlying database failure.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<UserStoreError> for ApiError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::DuplicateEmail => ApiError::AlreadyExists {
                resource: "email".to_string(),
            },
            UserStoreError::DuplicateUsername => ApiError::AlreadyExists {
                resource: "username".to_string(),
            },
            UserStoreError::NotFound => ApiError::NotFound {
                resource: "user".to_string(),
            },
            UserStoreError::Database(e) => ApiError::Database(e),
        }
    }
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Identity persistence contract consumed by the orchestrator.
///
/// Every call is synchronous and transactional on its own; implementations
/// must map uniqueness violations to the typed duplicate errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Creates a user, assigning the identifier and timestamps.
    ///
    /// ## Errors
    ///
    /// - `DuplicateEmail` / `DuplicateUsername` on uniqueness violations
    async fn create_user(&self, new_user: NewUser) -> Result<User, UserStoreError>;

    /// Looks a user up by email.
    ///
    /// ## Errors
    ///
    /// - `NotFound` when no user holds the email
    async fn get_user_by_email(&self, email: &str) -> Result<User, UserStoreError>;

    /// Looks a user up by id.
    ///
    /// ## Errors
    ///
    /// - `NotFound` when the id is unknown
    async fn get_user_by_id(&self, user_id: Uuid) -> Result<User, UserStoreError>;

    /// Persists updated user fields, returning the stored row.
    async fn update_user(&self, user: User) -> Result<User, UserStoreError>;

    /// Returns `true` when no user holds the given username.
    async fn check_username_available(&self, username: &str) -> Result<bool, UserStoreError>;
}

// =============================================================================
// POSTGRES IMPLEMENTATION
// =============================================================================

/// PostgreSQL-backed [`UserStore`].
///
/// # Thread Safety
///
/// `PgUserStore` is `Send + Sync` because `PgPool` is `Arc`-based
/// internally; cloning is cheap.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl PgUserStore {
    /// Creates a new store over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Maps a unique-constraint violation to the matching typed error.
    fn map_unique_violation(e: sqlx::Error) -> UserStoreError {
        if let sqlx::Error::Database(ref db_err) = e {
            match db_err.constraint() {
                Some("users_email_key") => return UserStoreError::DuplicateEmail,
                Some("users_username_key") => return UserStoreError::DuplicateUsername,
                _ => {}
            }
        }
        UserStoreError::Database(e)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, UserStoreError> {
        // First login coincides with creation for provider-created users.
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                email, username, display_name, first_name, last_name,
                avatar_url, status, metadata, last_login_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING *
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.username)
        .bind(&new_user.display_name)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.avatar_url)
        .bind(&new_user.status)
        .bind(&new_user.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::map_unique_violation)?;

        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, UserStoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(UserStoreError::NotFound)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<User, UserStoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(UserStoreError::NotFound)
    }

    async fn update_user(&self, user: User) -> Result<User, UserStoreError> {
        let updated = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET email = $1,
                username = $2,
                display_name = $3,
                first_name = $4,
                last_name = $5,
                avatar_url = $6,
                status = $7,
                metadata = $8,
                last_login_at = $9,
                updated_at = NOW()
            WHERE user_id = $10
            RETURNING *
            "#,
        )
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.avatar_url)
        .bind(&user.status)
        .bind(&user.metadata)
        .bind(user.last_login_at)
        .bind(user.user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_unique_violation)?
        .ok_or(UserStoreError::NotFound)?;

        Ok(updated)
    }

    async fn check_username_available(&self, username: &str) -> Result<bool, UserStoreError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0 == 0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
