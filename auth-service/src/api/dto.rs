//! # Data Transfer Objects (DTOs)
//!
//! Request and response shapes for the authentication API.
//!
//! ## DTO Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Request DTOs (input)              Response DTOs (output)               │
//! │  ───────────────────               ─────────────────────                │
//! │  - CheckUsernameRequest            - CheckUsernameResponse              │
//! │  - InitAnonymousRequest            - InitAnonymousResponse              │
//! │  - AuthenticateRequest             - AuthenticateResponse               │
//! │  - RefreshTokenRequest             - TokenResponse                      │
//! │  - OAuthInitQuery                  - CallbackMobileResponse             │
//! │  - OAuthCallbackQuery              - PublicKeyResponse                  │
//! │                                    - IdentityResponse                   │
//! │                                    - HealthResponse                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## JSON Naming
//!
//! RPC request/response bodies use `camelCase` to match the web and mobile
//! clients. The browser-facing callback and refresh endpoints use
//! `snake_case` (`session_migrated`, `expired_token`) - that is the shape
//! mobile SDKs already parse; `RefreshTokenRequest` accepts both spellings
//! via a serde alias.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::UserProfile;

// =============================================================================
// RPC REQUESTS
// =============================================================================

/// Request body for username availability checks.
///
/// # Example JSON
///
/// ```json
/// { "username": "jakarta_explorer" }
/// ```
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckUsernameRequest {
    /// Handle to check
    #[validate(length(min = 1, max = 64, message = "Username is required"))]
    pub username: String,
}

/// Request body for anonymous bootstrap.
///
/// # Example JSON
///
/// ```json
/// { "username": "jakarta_explorer" }
/// ```
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitAnonymousRequest {
    /// Handle to claim
    #[validate(length(min = 1, max = 64, message = "Username is required"))]
    pub username: String,
}

/// Request body for credential authentication.
///
/// # Example JSON
///
/// ```json
/// {
///   "provider": "google",
///   "credential": "<id-token or access token>",
///   "sessionId": "b2c4e6a8d0f1a3b5c7d9e1f2a4b6c8d0"
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    /// Provider name ("google", ...)
    #[validate(length(min = 1, message = "Provider is required"))]
    pub provider: String,

    /// Opaque provider-specific credential
    #[validate(length(min = 1, message = "Credential is required"))]
    pub credential: String,

    /// Anonymous session to migrate after sign-in
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Request body for token refresh.
///
/// Accepts both the RPC spelling (`expiredToken`) and the browser
/// endpoint's spelling (`expired_token`).
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    /// The expired (but still refresh-admissible) token
    #[serde(alias = "expired_token")]
    #[validate(length(min = 1, message = "Expired token is required"))]
    pub expired_token: String,
}

// =============================================================================
// BROWSER QUERIES
// =============================================================================

/// Query parameters of OAuth initiation.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthInitQuery {
    /// Where the browser client wants to end up after the flow
    #[serde(default)]
    pub redirect_uri: String,

    /// Anonymous session to migrate after sign-in
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Query parameters of the OAuth callback.
///
/// Providers report errors through `error`/`error_description` instead of
/// `code`.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthCallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Response of username availability checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUsernameResponse {
    /// Whether the handle can be claimed
    pub available: bool,
    /// Why not, when it cannot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response of anonymous bootstrap.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitAnonymousResponse {
    /// Bearer token without expiry
    pub token: String,
    /// The issued session's id
    pub session_id: String,
    /// The claimed handle
    pub username: String,
}

/// Response of credential authentication.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    /// Bearer token; empty when a sign-in link was dispatched instead
    pub token: String,
    /// The authenticated user, absent for link-dispatch outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    /// Whether an anonymous session was migrated
    pub session_migrated: bool,
}

/// Response of token refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// The fresh bearer token
    pub token: String,
}

/// JSON rendering of a callback for mobile clients.
///
/// Web clients get a redirect with the token in the URL fragment instead;
/// this shape exists for clients that drive the flow in a web view and
/// intercept the callback response directly.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackMobileResponse {
    /// Bearer token
    pub token: String,
    /// The authenticated user
    pub user: Option<UserProfile>,
    /// Whether an anonymous session was migrated
    pub session_migrated: bool,
}

/// Response of the verification-key endpoint.
///
/// Snake_case on purpose: out-of-process validators consume this shape.
#[derive(Debug, Clone, Serialize)]
pub struct PublicKeyResponse {
    /// PEM-encoded RSA public key
    pub public_key: String,
    /// Signature algorithm of issued tokens
    pub algorithm: String,
}

/// Response of `GET /api/v1/auth/me`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    /// "anonymous" or "authenticated"
    pub auth_type: String,
    /// Session bound to the presented token
    pub session_id: String,
    /// Handle carried by the token
    pub username: String,
    /// Full profile, for authenticated callers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" when the database answers in time
    pub status: String,
    /// Service identifier
    pub service: String,
    /// When the probe ran (ISO 8601)
    pub timestamp: String,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_request_accepts_both_spellings() {
        let camel: RefreshTokenRequest =
            serde_json::from_str(r#"{"expiredToken": "abc"}"#).unwrap();
        assert_eq!(camel.expired_token, "abc");

        let snake: RefreshTokenRequest =
            serde_json::from_str(r#"{"expired_token": "abc"}"#).unwrap();
        assert_eq!(snake.expired_token, "abc");
    }

    #[test]
    fn test_authenticate_request_session_is_optional() {
        let request: AuthenticateRequest = serde_json::from_str(
            r#"{"provider": "google", "credential": "tok"}"#,
        )
        .unwrap();
        assert_eq!(request.session_id, None);
    }

    #[test]
    fn test_callback_query_tolerates_partial_parameters() {
        let query: OAuthCallbackQuery =
            serde_json::from_str(r#"{"error": "access_denied"}"#).unwrap();
        assert_eq!(query.error.as_deref(), Some("access_denied"));
        assert_eq!(query.code, None);
    }

    #[test]
    fn test_check_username_response_omits_empty_message() {
        let body = serde_json::to_string(&CheckUsernameResponse {
            available: true,
            message: None,
        })
        .unwrap();
        assert!(!body.contains("message"));
    }
}
