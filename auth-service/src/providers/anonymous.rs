//! # Anonymous Provider
//!
//! Internal provider that lets a visitor claim a handle and start using the
//! service without an account.
//!
//! ## How It Works
//!
//! The credential is a JSON payload `{"username": "..."}`. The provider
//! checks the handle against both identifier spaces - registered users and
//! already-claimed anonymous handles - then asks the session manager for a
//! fresh anonymous session.
//!
//! The returned [`UserInfo`] is peculiar on purpose: its `id` is the
//! **session id**, because an anonymous holder has no user id. Downstream
//! code keeps that distinction in `SubjectId`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{InternalProvider, ProviderError};
use crate::domain::UserInfo;
use crate::repository::UserStore;
use crate::session::SessionManager;
use serde::Deserialize;
use shared::validation::{parse_and_validate, validators};
use validator::Validate;

/// Registry name of this provider.
pub const PROVIDER_NAME: &str = "anonymous";

// =============================================================================
// CREDENTIAL
// =============================================================================

/// The provider-specific credential payload.
#[derive(Debug, Deserialize, Validate)]
struct AnonymousCredential {
    /// Handle the visitor wants to claim
    #[validate(custom(function = "validators::username"))]
    username: String,
}

// =============================================================================
// PROVIDER
// =============================================================================

/// Internal provider issuing anonymous sessions.
pub struct AnonymousProvider {
    /// Session lifecycle service; issues the anonymous session
    sessions: SessionManager,
    /// User persistence; answers whether a handle is registered
    users: Arc<dyn UserStore>,
}

impl AnonymousProvider {
    /// Creates the provider over its collaborators.
    pub fn new(sessions: SessionManager, users: Arc<dyn UserStore>) -> Self {
        Self { sessions, users }
    }
}

#[async_trait]
impl InternalProvider for AnonymousProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn authenticate(&self, credential: &str) -> Result<UserInfo, ProviderError> {
        let payload: AnonymousCredential = parse_and_validate(credential)
            .map_err(|e| ProviderError::MalformedCredential(e.to_string()))?;

        // A handle is taken if a registered user holds it...
        let available = self
            .users
            .check_username_available(&payload.username)
            .await
            .map_err(|e| ProviderError::Store(e.to_string()))?;
        if !available {
            return Err(ProviderError::UsernameTaken);
        }

        // ...or if another session already claimed it.
        if self.sessions.find_by_username(&payload.username).await?.is_some() {
            return Err(ProviderError::UsernameTaken);
        }

        let session = self.sessions.create_anonymous(&payload.username).await?;

        info!(
            session_id = %session.session_id,
            username = %payload.username,
            "Anonymous identity issued"
        );

        // The subject of an anonymous identity is the session itself.
        Ok(UserInfo {
            id: session.session_id,
            email: String::new(),
            username: payload.username,
            first_name: String::new(),
            last_name: String::new(),
            name: String::new(),
            picture: String::new(),
            email_verified: false,
            verified_at: None,
            provider: PROVIDER_NAME.to_string(),
            metadata: serde_json::json!({}),
        })
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        // No external configuration; the collaborators are wired by
        // construction.
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockUserStore;
    use crate::session::InMemorySessionStore;
    use shared::config::SessionConfig;

    fn provider_with_users(users: MockUserStore) -> AnonymousProvider {
        let sessions = SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            &SessionConfig::default(),
        );
        AnonymousProvider::new(sessions, Arc::new(users))
    }

    fn open_user_store() -> MockUserStore {
        let mut users = MockUserStore::new();
        users
            .expect_check_username_available()
            .returning(|_| Ok(true));
        users
    }

    #[tokio::test]
    async fn test_issues_session_backed_identity() {
        let provider = provider_with_users(open_user_store());

        let info = provider
            .authenticate(r#"{"username": "jakarta_explorer"}"#)
            .await
            .unwrap();

        assert_eq!(info.provider, "anonymous");
        assert_eq!(info.username, "jakarta_explorer");
        assert!(info.email.is_empty());
        // The identity's id is the session id
        assert_eq!(info.id.len(), 32);
    }

    #[tokio::test]
    async fn test_second_claim_of_same_handle_rejected() {
        let provider = provider_with_users(open_user_store());

        provider
            .authenticate(r#"{"username": "jakarta_explorer"}"#)
            .await
            .unwrap();

        let result = provider
            .authenticate(r#"{"username": "jakarta_explorer"}"#)
            .await;
        assert!(matches!(result, Err(ProviderError::UsernameTaken)));
    }

    #[tokio::test]
    async fn test_registered_username_rejected() {
        let mut users = MockUserStore::new();
        users
            .expect_check_username_available()
            .returning(|_| Ok(false));

        let provider = provider_with_users(users);

        let result = provider.authenticate(r#"{"username": "taken_handle"}"#).await;
        assert!(matches!(result, Err(ProviderError::UsernameTaken)));
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let provider = provider_with_users(open_user_store());

        let result = provider.authenticate("not json").await;
        assert!(matches!(result, Err(ProviderError::MalformedCredential(_))));
    }

    #[tokio::test]
    async fn test_invalid_username_format_rejected() {
        let provider = provider_with_users(open_user_store());

        let result = provider.authenticate(r#"{"username": "X"}"#).await;
        assert!(matches!(result, Err(ProviderError::MalformedCredential(_))));
    }
}
