//! # Provider Layer
//!
//! Pluggable credential verifiers with a typed capability split.
//!
//! ## Capability Model
//!
//! ```text
//!                       ┌──────────────────┐
//!                       │     Provider     │   sum type held by the registry
//!                       └────────┬─────────┘
//!              ┌────────────────┴──────────────────┐
//!              ▼                                   ▼
//!   Internal(Arc<dyn InternalProvider>)   OAuth(Arc<dyn OAuthProvider>)
//!   - name / authenticate                 - name / authenticate
//!   - validate_config                     - validate_config
//!                                         - authorization_url
//!                                         - exchange_code
//!                                         - fetch_user_info
//! ```
//!
//! The orchestrator consumes whichever capability it needs: the common
//! `authenticate` for credential flows, the OAuth surface for the browser
//! flow. Branching on provider kind happens here, at the type, not as
//! downcasts inside the orchestrator.
//!
//! ## Providers
//!
//! | Provider | Kind | Credential |
//! |----------|------|------------|
//! | [`anonymous`] | internal | JSON `{"username": ...}` |
//! | [`google`] | oauth | OAuth code (browser flow) or a Google ID token |
//!
//! Provider errors are normalized to `ApiError` only at the orchestrator
//! boundary; nothing outside the service layer sees [`ProviderError`].

pub mod anonymous;
pub mod google;
pub mod registry;

pub use anonymous::AnonymousProvider;
pub use google::GoogleProvider;
pub use registry::ProviderRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::UserInfo;
use crate::session::SessionError;

// =============================================================================
// ERRORS
// =============================================================================

/// Failures a provider can signal.
///
/// These stay provider-internal; the orchestrator translates them into the
/// closed API error set (`InvalidCredentials` → `Unauthenticated`,
/// `UserDisabled` → `PermissionDenied`, and so on).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The presented credential failed verification.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The provider requires an existing account and none matched.
    #[error("user not found")]
    UserNotFound,

    /// The account exists but is disabled.
    #[error("user disabled")]
    UserDisabled,

    /// The provider requires a verified email and the email is unverified.
    #[error("email not verified")]
    EmailNotVerified,

    /// The requested username is already claimed.
    #[error("username taken")]
    UsernameTaken,

    /// A sign-in link was dispatched instead of completing authentication.
    #[error("magic link sent")]
    MagicLinkSent,

    /// The credential payload could not be parsed.
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    /// A provider HTTP round-trip failed.
    #[error("provider request failed: {0}")]
    Http(String),

    /// The provider is misconfigured or was registered twice.
    #[error("provider configuration error: {0}")]
    Config(String),

    /// Identity storage failed underneath a provider check.
    #[error("store error: {0}")]
    Store(String),

    /// Session issuance failed (anonymous provider).
    #[error(transparent)]
    Session(#[from] SessionError),
}

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// A provider that verifies credentials directly, without an external
/// authorization round-trip.
#[async_trait]
pub trait InternalProvider: Send + Sync {
    /// Registry name of the provider.
    fn name(&self) -> &str;

    /// Verifies an opaque, provider-specific credential and produces a
    /// normalized identity.
    async fn authenticate(&self, credential: &str) -> Result<UserInfo, ProviderError>;

    /// Checks the provider's configuration at registration time.
    fn validate_config(&self) -> Result<(), ProviderError>;
}

/// Tokens produced by an authorization-code exchange.
#[derive(Debug, Clone)]
pub struct ExchangedTokens {
    /// Bearer token for the provider's APIs
    pub access_token: String,
    /// Long-lived renewal token, when the provider grants one
    pub refresh_token: Option<String>,
    /// Access token expiry, when reported
    pub expires_at: Option<DateTime<Utc>>,
}

/// A provider speaking the OAuth 2.0 authorization-code flow.
///
/// A superset of the internal contract: OAuth providers also `authenticate`
/// directly (e.g. verifying an ID token a mobile client obtained natively).
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Registry name of the provider.
    fn name(&self) -> &str;

    /// Authorization endpoint URL carrying the sealed `state`.
    fn authorization_url(&self, state: &str) -> Result<String, ProviderError>;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<ExchangedTokens, ProviderError>;

    /// Fetches the normalized identity with a provider access token.
    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError>;

    /// Verifies an opaque credential (access token or ID token) and
    /// produces a normalized identity.
    async fn authenticate(&self, credential: &str) -> Result<UserInfo, ProviderError>;

    /// Checks the provider's configuration at registration time.
    fn validate_config(&self) -> Result<(), ProviderError>;
}

// =============================================================================
// PROVIDER SUM TYPE
// =============================================================================

/// A registered provider, tagged by capability.
#[derive(Clone)]
pub enum Provider {
    /// Direct credential verification
    Internal(Arc<dyn InternalProvider>),
    /// OAuth 2.0 authorization-code flow
    OAuth(Arc<dyn OAuthProvider>),
}

impl Provider {
    /// Registry name.
    pub fn name(&self) -> &str {
        match self {
            Provider::Internal(p) => p.name(),
            Provider::OAuth(p) => p.name(),
        }
    }

    /// Capability tag: `"internal"` or `"oauth"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Provider::Internal(_) => "internal",
            Provider::OAuth(_) => "oauth",
        }
    }

    /// Common capability: verify a credential, produce an identity.
    pub async fn authenticate(&self, credential: &str) -> Result<UserInfo, ProviderError> {
        match self {
            Provider::Internal(p) => p.authenticate(credential).await,
            Provider::OAuth(p) => p.authenticate(credential).await,
        }
    }

    /// The OAuth capability, when this provider has it.
    pub fn as_oauth(&self) -> Option<&Arc<dyn OAuthProvider>> {
        match self {
            Provider::OAuth(p) => Some(p),
            Provider::Internal(_) => None,
        }
    }

    /// Configuration check, dispatched by capability.
    pub fn validate_config(&self) -> Result<(), ProviderError> {
        match self {
            Provider::Internal(p) => p.validate_config(),
            Provider::OAuth(p) => p.validate_config(),
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
