//! # Application Error Types
//!
//! Unified error handling for the Plaza backend with automatic HTTP conversion.
//!
//! ## Design Philosophy
//!
//! The error surface is a **closed set**: every failure a caller can observe
//! maps to one of the variants below. Internal libraries (provider clients,
//! token primitives, stores) have their own richer error types, but those are
//! translated at the service boundary so API clients only ever see this set.
//!
//! ## Error Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ApiError Categories                            │
//! ├─────────────────────────┬───────────────────┬───────────────────────────┤
//! │ Identity (401, 403)     │ Input (400, 412)  │ Resources (404, 409)      │
//! ├─────────────────────────┼───────────────────┼───────────────────────────┤
//! │ Unauthenticated         │ InvalidArgument   │ NotFound                  │
//! │ PermissionDenied        │ Validation        │ AlreadyExists             │
//! │                         │ FailedPrecondition│                           │
//! ├─────────────────────────┴───────────────────┴───────────────────────────┤
//! │ Server (500, 503)                                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │ Unavailable │ Database │ Redis │ Internal                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## HTTP Response Format
//!
//! All errors are serialized to a consistent JSON format:
//!
//! ```json
//! {
//!   "code": "UNAUTHENTICATED",
//!   "message": "unauthenticated",
//!   "request_id": "550e8400-e29b-41d4-a716-446655440000",
//!   "details": { ... },
//!   "timestamp": "2026-01-15T10:30:00Z"
//! }
//! ```
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::errors::{ApiError, ApiResult};
//!
//! async fn get_user(id: Uuid) -> ApiResult<User> {
//!     store
//!         .get_user_by_id(id)
//!         .await?                                   // Database → 503
//!         .ok_or(ApiError::NotFound {
//!             resource: format!("user:{}", id),
//!         })                                        // NotFound → 404
//! }
//! ```

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for handlers and services.
///
/// Use this instead of `Result<T, ApiError>` for cleaner signatures:
///
/// ```rust,ignore
/// async fn handler() -> ApiResult<User> { ... }
/// ```
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Main Error Enum
// =============================================================================

/// Application error type with automatic HTTP status mapping.
///
/// Each variant represents a specific failure condition and maps to an
/// appropriate HTTP status code. The `#[error]` attribute defines the
/// error message format.
///
/// Messages deliberately avoid detail in the credential paths: a malformed
/// token, a bad signature, and a token expired beyond its refresh window all
/// surface as the same `Unauthenticated`, so a probing client learns nothing
/// about which check failed.
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Identity Errors (401 Unauthorized, 403 Forbidden)
    // =========================================================================

    /// Missing, malformed, expired-beyond-refresh, or bad-signature token;
    /// or a provider rejected the presented credentials.
    /// Returns 401 Unauthorized.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Identity is valid but the account is disabled or the caller does not
    /// own the resource. Re-authenticating will not help.
    /// Returns 403 Forbidden.
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// Short description of the denial (e.g. "account disabled")
        reason: String,
    },

    // =========================================================================
    // Input Errors (400 Bad Request, 412 Precondition Failed)
    // =========================================================================

    /// Empty required field, malformed credential payload, or an invalid or
    /// expired OAuth state value.
    /// Returns 400 Bad Request.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable description of what's wrong
        message: String,
    },

    /// Request body failed validation rules.
    /// Contains field-level errors from the `validator` crate.
    /// Returns 400 Bad Request with details.
    #[error("validation error")]
    Validation(#[from] ValidationErrors),

    /// A provider requires email verification and the email is unverified.
    /// Returns 412 Precondition Failed.
    #[error("failed precondition: {message}")]
    FailedPrecondition {
        /// Which precondition was not met
        message: String,
    },

    // =========================================================================
    // Resource Errors (404 Not Found, 409 Conflict)
    // =========================================================================

    /// Unknown provider, or no user with the given id/email.
    /// Returns 404 Not Found.
    #[error("not found: {resource}")]
    NotFound {
        /// Resource identifier (e.g. "user:123", "provider:github")
        resource: String,
    },

    /// Uniqueness violation, e.g. a username that is already taken.
    /// Returns 409 Conflict.
    #[error("already exists: {resource}")]
    AlreadyExists {
        /// Description of the conflict (e.g. "username")
        resource: String,
    },

    // =========================================================================
    // Server Errors (500 Internal Server Error, 503 Service Unavailable)
    // =========================================================================
    // These are logged as errors and monitored.
    // Details are NOT exposed to clients.

    /// Transient failure of an external collaborator (provider endpoint,
    /// storage). Returns 503 Service Unavailable.
    #[error("unavailable: {service}")]
    Unavailable {
        /// Name of the unavailable service
        service: String,
    },

    /// PostgreSQL query failed. Wraps `sqlx::Error`; details logged,
    /// generic message returned. Returns 503 Service Unavailable.
    #[error("storage error")]
    Database(#[from] sqlx::Error),

    /// Redis operation failed. Wraps `redis::RedisError`; details logged,
    /// generic message returned. Returns 503 Service Unavailable.
    #[error("session store error")]
    Redis(#[from] redis::RedisError),

    /// Programming defect or unexpected state (e.g. signing-key
    /// misconfiguration). Returns 500 Internal Server Error.
    #[error("internal server error")]
    Internal {
        /// Internal message for logging (not exposed to client)
        message: String,
    },
}

// =============================================================================
// Error Methods
// =============================================================================

impl ApiError {
    /// Returns a machine-readable error code.
    ///
    /// These codes are stable and can be used by API clients for
    /// programmatic error handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::InvalidArgument { .. } | Self::Validation(_) => "INVALID_ARGUMENT",
            Self::FailedPrecondition { .. } => "FAILED_PRECONDITION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Unavailable { .. } | Self::Database(_) | Self::Redis(_) => "UNAVAILABLE",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// This is the source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,

            Self::PermissionDenied { .. } => StatusCode::FORBIDDEN,

            Self::InvalidArgument { .. } | Self::Validation(_) => StatusCode::BAD_REQUEST,

            Self::FailedPrecondition { .. } => StatusCode::PRECONDITION_FAILED,

            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            Self::AlreadyExists { .. } => StatusCode::CONFLICT,

            Self::Unavailable { .. } | Self::Database(_) | Self::Redis(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if this is a server-side error (5xx).
    ///
    /// Server errors are logged at ERROR level and must not expose internal
    /// details to clients. Client errors (4xx) are logged at WARN level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. }
                | Self::Database(_)
                | Self::Redis(_)
                | Self::Internal { .. }
        )
    }

    /// Shorthand for the opaque state-open failure.
    ///
    /// Whether a sealed OAuth state failed authentication, parsing, or the
    /// freshness check, callers get the same answer.
    pub fn invalid_state() -> Self {
        Self::InvalidArgument {
            message: "invalid or expired state".to_string(),
        }
    }
}

// =============================================================================
// Response Structure
// =============================================================================

/// Standard error response body for the API.
///
/// All API errors are serialized to this format for consistency.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code for programmatic handling
    pub code: String,

    /// Human-readable message (for debugging, not for user display)
    pub message: String,

    /// Request ID for tracing across services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Additional error details (varies by error type).
    /// - Validation: field-level errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// When the error occurred (ISO 8601 format)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    /// Creates a new error response from an `ApiError`.
    pub fn new(error: &ApiError) -> Self {
        // Extract type-specific details
        let details = match error {
            ApiError::Validation(errors) => {
                Some(serde_json::to_value(errors).unwrap_or_default())
            }
            // Server errors: don't expose internal details
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            request_id: None,
            details,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Adds a request ID for tracing.
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }
}

// =============================================================================
// Actix-web Integration
// =============================================================================

/// Implements Actix-web's `ResponseError` trait.
///
/// This allows returning `ApiError` directly from handlers:
///
/// ```rust,ignore
/// async fn handler() -> Result<impl Responder, ApiError> {
///     Err(ApiError::NotFound { resource: "user:123".into() })
/// }
/// ```
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        // Delegate to our implementation
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let response = ErrorResponse::new(self);
        HttpResponse::build(self.status_code()).json(response)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_errors_status() {
        assert_eq!(ApiError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::PermissionDenied { reason: "account disabled".to_string() }.status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_input_errors_status() {
        assert_eq!(
            ApiError::InvalidArgument { message: "username required".to_string() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::FailedPrecondition { message: "email not verified".to_string() }
                .status_code(),
            StatusCode::PRECONDITION_FAILED
        );
    }

    #[test]
    fn test_resource_errors_status() {
        assert_eq!(
            ApiError::NotFound { resource: "provider:github".to_string() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::AlreadyExists { resource: "username".to_string() }.status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ApiError::Unauthenticated.error_code(), "UNAUTHENTICATED");
        assert_eq!(
            ApiError::AlreadyExists { resource: "username".to_string() }.error_code(),
            "ALREADY_EXISTS"
        );
        assert_eq!(
            ApiError::Unavailable { service: "google".to_string() }.error_code(),
            "UNAVAILABLE"
        );
    }

    #[test]
    fn test_server_errors_are_flagged() {
        assert!(ApiError::Internal { message: "boom".to_string() }.is_server_error());
        assert!(ApiError::Unavailable { service: "postgres".to_string() }.is_server_error());
        assert!(!ApiError::Unauthenticated.is_server_error());
        assert!(!ApiError::NotFound { resource: "user".to_string() }.is_server_error());
    }

    #[test]
    fn test_invalid_state_is_opaque() {
        let err = ApiError::invalid_state();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "invalid argument: invalid or expired state");
    }

    #[test]
    fn test_error_response_includes_timestamp() {
        let error = ApiError::Unauthenticated;
        let response = ErrorResponse::new(&error);

        let now = chrono::Utc::now();
        let diff = now - response.timestamp;
        assert!(diff.num_seconds() < 60);
    }

    #[test]
    fn test_error_response_with_request_id() {
        let error = ApiError::Unauthenticated;
        let request_id = Uuid::new_v4();
        let response = ErrorResponse::new(&error).with_request_id(request_id);

        assert_eq!(response.request_id, Some(request_id.to_string()));
    }
}
