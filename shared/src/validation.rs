//! # Request Validation Helpers
//!
//! Utilities for validating incoming request data using the `validator` crate.
//!
//! ## Overview
//!
//! Validation happens in two layers:
//!
//! 1. **DTO rules** - `#[validate(...)]` attributes on request structs
//! 2. **Custom validators** - domain rules like username format, exposed in
//!    the [`validators`] submodule
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use shared::validation::{validate_request, validators};
//! use validator::Validate;
//!
//! #[derive(Validate, Deserialize)]
//! struct InitAnonymousRequest {
//!     #[validate(custom(function = "validators::username"))]
//!     username: String,
//! }
//!
//! async fn handler(body: Json<InitAnonymousRequest>) -> Result<impl Responder, ApiError> {
//!     validate_request(&body)?;
//!     // Validation passed, continue...
//! }
//! ```

use crate::errors::ApiError;
use serde::de::DeserializeOwned;
use validator::Validate;

// =============================================================================
// Core Validation Functions
// =============================================================================

/// Validates a request DTO that implements `Validate`.
///
/// This is the primary validation function. Use it in handlers to
/// validate incoming data.
///
/// ## Errors
///
/// Returns `ApiError::Validation` with field-level details if validation fails.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), ApiError> {
    data.validate().map_err(ApiError::Validation)
}

/// Parses a JSON string and validates in a single step.
///
/// Used for opaque credential payloads whose shape is provider-specific:
/// the provider deserializes its own credential structure and validates it
/// in one call.
///
/// ## Errors
///
/// - `ApiError::InvalidArgument` if JSON parsing fails
/// - `ApiError::Validation` if validation fails
pub fn parse_and_validate<T: DeserializeOwned + Validate>(json: &str) -> Result<T, ApiError> {
    let data: T = serde_json::from_str(json).map_err(|e| ApiError::InvalidArgument {
        message: format!("malformed payload: {}", e),
    })?;

    validate_request(&data)?;

    Ok(data)
}

// =============================================================================
// Custom Validators
// =============================================================================

/// Custom validation functions for use with `#[validate(custom)]`.
///
/// These functions follow the validator crate's signature:
/// `fn(&str) -> Result<(), ValidationError>`
pub mod validators {
    use validator::ValidationError;

    /// Validates that a string is not blank (empty or whitespace-only).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("blank"));
        }
        Ok(())
    }

    /// Validates a public username handle.
    ///
    /// ## Rules
    ///
    /// - 3 to 32 characters
    /// - Only lowercase letters, digits, and underscores
    /// - Must start with a letter or digit
    ///
    /// ## Valid Examples
    ///
    /// - `"jakarta_explorer"` ✓
    /// - `"wanderer99"` ✓
    ///
    /// ## Invalid Examples
    ///
    /// - `"ab"` ✗ (too short)
    /// - `"_hidden"` ✗ (leading underscore)
    /// - `"Bad-Name"` ✗ (uppercase, hyphen)
    pub fn username(value: &str) -> Result<(), ValidationError> {
        if value.len() < 3 || value.len() > 32 {
            return Err(ValidationError::new("username_length"));
        }

        let mut chars = value.chars();

        match chars.next() {
            Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
            _ => return Err(ValidationError::new("username_start")),
        }

        if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
            return Err(ValidationError::new("username_charset"));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::validators::*;

    #[test]
    fn test_not_blank() {
        assert!(not_blank("hello").is_ok());
        assert!(not_blank("  hello  ").is_ok());
        assert!(not_blank("").is_err());
        assert!(not_blank("   ").is_err());
    }

    #[test]
    fn test_username_accepts_valid_handles() {
        assert!(username("jakarta_explorer").is_ok());
        assert!(username("wanderer99").is_ok());
        assert!(username("abc").is_ok());
        assert!(username("9lives").is_ok());
    }

    #[test]
    fn test_username_rejects_bad_length() {
        assert!(username("ab").is_err());
        assert!(username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_username_rejects_bad_start() {
        assert!(username("_hidden").is_err());
    }

    #[test]
    fn test_username_rejects_bad_charset() {
        assert!(username("Bad-Name").is_err());
        assert!(username("has space").is_err());
        assert!(username("ümlaut_x").is_err());
    }
}
