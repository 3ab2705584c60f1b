//! # Bearer Token Service
//!
//! Signing, verification, and refresh of the bearer tokens that carry
//! identity through the Plaza API.
//!
//! ## Token Model
//!
//! There are two tiers of token, distinguished by the `type` claim:
//!
//! | Token Type | Expiry | Refresh | Subject |
//! |------------|--------|---------|---------|
//! | Anonymous | none (never expires) | not refreshable | session id only |
//! | Authenticated | `access_ttl` (1 h default) | within `[exp, refresh_until]` | user id |
//!
//! Authenticated tokens carry a `refresh_until` claim strictly greater than
//! `exp`. An expired token whose `refresh_until` has not passed can be
//! exchanged for a fresh token without re-authenticating; past
//! `refresh_until` the holder must sign in again. Because the window is
//! encoded in the token itself, refresh needs no server-side bookkeeping.
//!
//! ## Why RS256?
//!
//! Tokens are signed with an RSA keypair rather than a shared secret so
//! downstream services can verify them with the public key alone
//! ([`TokenManager::public_key_pem`]) and never hold signing material.
//!
//! ## Claims
//!
//! | Claim | Description |
//! |-------|-------------|
//! | `iss` / `aud` | Issuer and audience, verified on every validation |
//! | `iat` | Issued-at (unix seconds) |
//! | `exp` | Expiry; absent only on anonymous tokens |
//! | `refresh_until` | End of the refresh window; authenticated tokens only |
//! | `sub` | User id; empty for anonymous tokens |
//! | `session_id` | Session the token is bound to |
//! | `username` / `email` / `provider` | Subject descriptors |
//! | `is_anonymous` / `type` | Tier markers |

use crate::config::JwtConfig;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Typed failures of token verification and refresh.
///
/// The distinctions exist for the interceptor and the refresh path; at the
/// API boundary everything except `Signing`/`Key` collapses into a single
/// `Unauthenticated` so callers cannot probe which check failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Not a decodable JWS, or claims of the wrong shape.
    #[error("malformed token")]
    Malformed,

    /// Signature does not verify against the configured public key.
    #[error("bad signature")]
    BadSignature,

    /// `exp` has passed (the refresh window may still be open).
    #[error("token expired")]
    Expired,

    /// `aud` does not match the configured audience.
    #[error("wrong audience")]
    WrongAudience,

    /// `iss` does not match the configured issuer.
    #[error("wrong issuer")]
    WrongIssuer,

    /// Refresh was attempted on a token that has not expired yet.
    #[error("token not expired")]
    NotYetExpired,

    /// Refresh was attempted after `refresh_until`.
    #[error("refresh window closed")]
    RefreshWindowClosed,

    /// Refresh was attempted on an anonymous token.
    #[error("anonymous tokens are not refreshable")]
    AnonymousNotRefreshable,

    /// Signing failed; signing-key misconfiguration, unrecoverable per-request.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Key material could not be loaded or generated.
    #[error("key error: {0}")]
    Key(String),
}

impl From<TokenError> for crate::errors::ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(message) | TokenError::Key(message) => {
                crate::errors::ApiError::Internal { message }
            }
            _ => crate::errors::ApiError::Unauthenticated,
        }
    }
}

// =============================================================================
// Claims
// =============================================================================

/// Distinguishes the two token tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Session-only token with no expiry.
    Anonymous,
    /// User-bound token with expiry and a refresh window.
    Authenticated,
}

/// JWT claims (token payload).
///
/// All fields are verified during validation; `exp` is checked manually so
/// the error set stays typed and anonymous tokens (which have no `exp`)
/// validate at any future time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer - who created the token.
    pub iss: String,

    /// Audience - who the token is intended for.
    pub aud: String,

    /// Issued-at as unix timestamp (seconds).
    pub iat: i64,

    /// Expiry as unix timestamp. Absent only on anonymous tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// End of the refresh window, strictly greater than `exp`.
    /// Present only on authenticated tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_until: Option<i64>,

    /// Subject - the user id. Empty for anonymous tokens, whose subject is
    /// the session instead.
    #[serde(default)]
    pub sub: String,

    /// Session the token is bound to.
    pub session_id: String,

    /// Public handle of the subject.
    pub username: String,

    /// Email of the subject; empty for anonymous tokens.
    #[serde(default)]
    pub email: String,

    /// Provider that authenticated the subject ("anonymous", "google", ...).
    pub provider: String,

    /// Convenience marker mirroring `type`.
    pub is_anonymous: bool,

    /// Token tier.
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// The identity a token is minted for.
///
/// `user_id` is `None` for anonymous subjects; the session id then stands
/// in as the subject (kept apart in the type system, see
/// `auth_service::domain::SubjectId`).
#[derive(Debug, Clone)]
pub struct TokenSubject {
    /// User id; `None` mints an anonymous token
    pub user_id: Option<String>,
    /// Session the token is bound to
    pub session_id: String,
    /// Public handle
    pub username: String,
    /// Email; empty when unknown
    pub email: String,
    /// Authenticating provider name
    pub provider: String,
}

// =============================================================================
// Token Manager
// =============================================================================

/// Service for bearer token signing, verification, and refresh.
///
/// # Thread Safety
///
/// The keypair is immutable after construction; the manager is `Send + Sync`
/// and is shared across workers behind an `Arc`. Signing and verification
/// are purely functional.
pub struct TokenManager {
    /// RSA private key for signing
    encoding_key: EncodingKey,
    /// RSA public key for verification
    decoding_key: DecodingKey,
    /// PEM form of the public key, exposed for out-of-process validators
    public_key_pem: String,
    /// Expected `iss` claim
    issuer: String,
    /// Expected `aud` claim
    audience: String,
    /// Width of the refresh window appended after expiry
    refresh_window: Duration,
}

impl TokenManager {
    /// Creates a manager from configuration.
    ///
    /// When both PEM paths are configured the keys are loaded from disk;
    /// otherwise a development keypair is generated, which invalidates all
    /// previously issued tokens on restart.
    ///
    /// ## Errors
    ///
    /// Returns `TokenError::Key` if key files cannot be read or parsed, or
    /// if generation fails.
    pub fn from_config(config: &JwtConfig) -> Result<Self, TokenError> {
        let (private_pem, public_pem) = match (&config.private_key_path, &config.public_key_path) {
            (Some(private_path), Some(public_path)) => {
                let private_pem = std::fs::read_to_string(private_path)
                    .map_err(|e| TokenError::Key(format!("read {}: {}", private_path, e)))?;
                let public_pem = std::fs::read_to_string(public_path)
                    .map_err(|e| TokenError::Key(format!("read {}: {}", public_path, e)))?;
                (private_pem, public_pem)
            }
            _ => {
                tracing::warn!(
                    "JWT key paths not configured; generating a development keypair. \
                     Outstanding tokens will not survive a restart."
                );
                generate_dev_keypair()?
            }
        };

        Self::from_pem(
            &private_pem,
            &public_pem,
            config.issuer.clone(),
            config.audience.clone(),
            Duration::seconds(config.refresh_window_seconds as i64),
        )
    }

    /// Creates a manager from PEM-encoded key material.
    pub fn from_pem(
        private_pem: &str,
        public_pem: &str,
        issuer: String,
        audience: String,
        refresh_window: Duration,
    ) -> Result<Self, TokenError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| TokenError::Key(format!("invalid private key: {}", e)))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| TokenError::Key(format!("invalid public key: {}", e)))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            public_key_pem: public_pem.to_string(),
            issuer,
            audience,
            refresh_window,
        })
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// Signs a token for the given subject.
    ///
    /// A zero `ttl` mints an anonymous token: no `exp`, no `refresh_until`,
    /// empty `sub`. Any positive `ttl` mints an authenticated token with
    /// `exp = now + ttl` and `refresh_until = exp + refresh_window`.
    ///
    /// ## Errors
    ///
    /// Fails only on signing-key misconfiguration (`TokenError::Signing`).
    pub fn sign(&self, subject: &TokenSubject, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now();
        let anonymous = ttl.is_zero();

        let (exp, refresh_until) = if anonymous {
            (None, None)
        } else {
            let exp = (now + ttl).timestamp();
            (Some(exp), Some(exp + self.refresh_window.num_seconds()))
        };

        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp,
            refresh_until,
            sub: if anonymous {
                String::new()
            } else {
                subject.user_id.clone().unwrap_or_default()
            },
            session_id: subject.session_id.clone(),
            username: subject.username.clone(),
            email: subject.email.clone(),
            provider: subject.provider.clone(),
            is_anonymous: anonymous,
            token_type: if anonymous {
                TokenType::Anonymous
            } else {
                TokenType::Authenticated
            },
        };

        self.encode(&claims)
    }

    /// Encodes a fully built claim set. Signing entry point shared by
    /// `sign` and the refresh path; exposed (hidden) so tests can mint
    /// tokens with explicit timestamps.
    #[doc(hidden)]
    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::RS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validates a token: signature, issuer, audience, and expiry.
    ///
    /// Anonymous tokens carry no expiry and therefore validate at any
    /// future time.
    ///
    /// ## Errors
    ///
    /// `Malformed`, `BadSignature`, `WrongIssuer`, `WrongAudience`, or
    /// `Expired`.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.validate_ignoring_expiry(token)?;

        if let Some(exp) = claims.exp {
            if Utc::now().timestamp() > exp {
                return Err(TokenError::Expired);
            }
        }

        Ok(claims)
    }

    /// Validates signature, issuer, and audience without enforcing expiry.
    ///
    /// This is the first phase of the interceptor's two-phase verify and the
    /// entry point of refresh: the caller decides what an expired-but-intact
    /// token is worth.
    pub fn validate_ignoring_expiry(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        // Expiry is enforced manually; anonymous tokens have no exp at all.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["iss", "aud"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::InvalidAudience => TokenError::WrongAudience,
                ErrorKind::InvalidIssuer => TokenError::WrongIssuer,
                _ => TokenError::Malformed,
            }
        })?;

        Ok(data.claims)
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Exchanges an expired authenticated token for a fresh one.
    ///
    /// The signature is verified ignoring expiry; the token must actually be
    /// expired, must not be anonymous, and `refresh_until` must not have
    /// passed. The new token carries the same subject, session, username,
    /// email, and provider with a fresh `exp` and `refresh_until`.
    ///
    /// Both the consumed token and the issued one remain refreshable until
    /// their respective `refresh_until`; there is no consumed-token
    /// registry.
    ///
    /// ## Errors
    ///
    /// Signature/shape failures as in [`validate`](Self::validate), plus
    /// `NotYetExpired`, `AnonymousNotRefreshable`, `RefreshWindowClosed`.
    pub fn refresh(&self, expired_token: &str, ttl: Duration) -> Result<String, TokenError> {
        let claims = self.validate_ignoring_expiry(expired_token)?;

        if claims.is_anonymous || claims.token_type == TokenType::Anonymous {
            return Err(TokenError::AnonymousNotRefreshable);
        }

        let exp = claims.exp.ok_or(TokenError::Malformed)?;
        let refresh_until = claims.refresh_until.ok_or(TokenError::Malformed)?;

        let now = Utc::now().timestamp();
        if now <= exp {
            return Err(TokenError::NotYetExpired);
        }
        if now > refresh_until {
            return Err(TokenError::RefreshWindowClosed);
        }

        let subject = TokenSubject {
            user_id: Some(claims.sub),
            session_id: claims.session_id,
            username: claims.username,
            email: claims.email,
            provider: claims.provider,
        };

        self.sign(&subject, ttl)
    }

    // =========================================================================
    // Key Exposure
    // =========================================================================

    /// PEM-encoded verification key for out-of-process validators.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }
}

// Implement Debug manually to avoid exposing key material
impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("refresh_window", &self.refresh_window)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Key Generation
// =============================================================================

/// Generates a 2048-bit RSA keypair as PKCS#8 PEM.
///
/// Development convenience only; production deployments mount persistent
/// keys via `JWT_PRIVATE_KEY_PATH` / `JWT_PUBLIC_KEY_PATH`.
pub fn generate_dev_keypair() -> Result<(String, String), TokenError> {
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048)
        .map_err(|e| TokenError::Key(format!("keypair generation failed: {}", e)))?;
    let public_key = private_key.to_public_key();

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| TokenError::Key(format!("private key encoding failed: {}", e)))?
        .to_string();

    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| TokenError::Key(format!("public key encoding failed: {}", e)))?;

    Ok((private_pem, public_pem))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// RSA keygen is slow; share one dev pair across the whole module.
    fn test_keys() -> &'static (String, String) {
        static KEYS: OnceLock<(String, String)> = OnceLock::new();
        KEYS.get_or_init(|| generate_dev_keypair().unwrap())
    }

    fn test_manager() -> TokenManager {
        let (private_pem, public_pem) = test_keys();
        TokenManager::from_pem(
            private_pem,
            public_pem,
            "plaza".to_string(),
            "plaza-api".to_string(),
            Duration::days(30),
        )
        .unwrap()
    }

    fn authenticated_subject() -> TokenSubject {
        TokenSubject {
            user_id: Some("5a7de0a1-9f33-4c59-9d21-0ed387c9a1f0".to_string()),
            session_id: "b2c4e6a8d0f1a3b5c7d9e1f2a4b6c8d0".to_string(),
            username: "jakarta_explorer".to_string(),
            email: "explorer@example.com".to_string(),
            provider: "google".to_string(),
        }
    }

    fn anonymous_subject() -> TokenSubject {
        TokenSubject {
            user_id: None,
            session_id: "b2c4e6a8d0f1a3b5c7d9e1f2a4b6c8d0".to_string(),
            username: "jakarta_explorer".to_string(),
            email: String::new(),
            provider: "anonymous".to_string(),
        }
    }

    #[test]
    fn test_authenticated_round_trip() {
        let manager = test_manager();
        let subject = authenticated_subject();

        let token = manager.sign(&subject, Duration::hours(1)).unwrap();
        let claims = manager.validate(&token).unwrap();

        assert_eq!(claims.sub, subject.user_id.unwrap());
        assert_eq!(claims.session_id, subject.session_id);
        assert_eq!(claims.username, "jakarta_explorer");
        assert_eq!(claims.provider, "google");
        assert!(!claims.is_anonymous);
        assert_eq!(claims.token_type, TokenType::Authenticated);

        // refresh_until is strictly beyond exp by the configured window
        let exp = claims.exp.unwrap();
        let refresh_until = claims.refresh_until.unwrap();
        assert_eq!(refresh_until - exp, Duration::days(30).num_seconds());
    }

    #[test]
    fn test_anonymous_token_has_no_expiry() {
        let manager = test_manager();

        let token = manager.sign(&anonymous_subject(), Duration::zero()).unwrap();
        let claims = manager.validate(&token).unwrap();

        assert!(claims.is_anonymous);
        assert_eq!(claims.token_type, TokenType::Anonymous);
        assert_eq!(claims.exp, None);
        assert_eq!(claims.refresh_until, None);
        assert_eq!(claims.sub, "");
    }

    #[test]
    fn test_anonymous_token_validates_regardless_of_age() {
        let manager = test_manager();

        // Mint a claim set issued a year ago; with no exp it still validates.
        let mut claims = manager
            .validate(&manager.sign(&anonymous_subject(), Duration::zero()).unwrap())
            .unwrap();
        claims.iat = (Utc::now() - Duration::days(365)).timestamp();

        let old_token = manager.encode(&claims).unwrap();
        assert!(manager.validate(&old_token).is_ok());
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = test_manager();
        let mut claims = manager
            .validate(&manager.sign(&authenticated_subject(), Duration::hours(1)).unwrap())
            .unwrap();

        claims.exp = Some((Utc::now() - Duration::minutes(1)).timestamp());
        let token = manager.encode(&claims).unwrap();

        assert_eq!(manager.validate(&token), Err(TokenError::Expired));
        // Signature-only validation still accepts it
        assert!(manager.validate_ignoring_expiry(&token).is_ok());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let manager = test_manager();

        // A manager with a foreign keypair produces tokens we must reject.
        let (foreign_private, foreign_public) = generate_dev_keypair().unwrap();
        let foreign = TokenManager::from_pem(
            &foreign_private,
            &foreign_public,
            "plaza".to_string(),
            "plaza-api".to_string(),
            Duration::days(30),
        )
        .unwrap();

        let token = foreign.sign(&authenticated_subject(), Duration::hours(1)).unwrap();
        assert_eq!(manager.validate(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let (private_pem, public_pem) = test_keys();
        let other = TokenManager::from_pem(
            private_pem,
            public_pem,
            "plaza".to_string(),
            "other-api".to_string(),
            Duration::days(30),
        )
        .unwrap();

        let token = other.sign(&authenticated_subject(), Duration::hours(1)).unwrap();
        assert_eq!(
            test_manager().validate(&token),
            Err(TokenError::WrongAudience)
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        let manager = test_manager();
        assert_eq!(
            manager.validate("not-a-token"),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_refresh_within_window() {
        let manager = test_manager();
        let mut claims = manager
            .validate(&manager.sign(&authenticated_subject(), Duration::hours(1)).unwrap())
            .unwrap();

        // Expired one minute ago, refresh window wide open
        claims.exp = Some((Utc::now() - Duration::minutes(1)).timestamp());
        claims.refresh_until = Some((Utc::now() + Duration::days(29)).timestamp());
        let expired = manager.encode(&claims).unwrap();

        let refreshed = manager.refresh(&expired, Duration::hours(1)).unwrap();
        let new_claims = manager.validate(&refreshed).unwrap();

        assert_eq!(new_claims.sub, claims.sub);
        assert_eq!(new_claims.session_id, claims.session_id);
        assert_eq!(new_claims.username, claims.username);
        assert!(new_claims.exp.unwrap() > Utc::now().timestamp());
        assert!(new_claims.refresh_until.unwrap() > new_claims.exp.unwrap());
    }

    #[test]
    fn test_refresh_rejects_unexpired_token() {
        let manager = test_manager();
        let token = manager.sign(&authenticated_subject(), Duration::hours(1)).unwrap();

        assert_eq!(
            manager.refresh(&token, Duration::hours(1)),
            Err(TokenError::NotYetExpired)
        );
    }

    #[test]
    fn test_refresh_rejects_closed_window() {
        let manager = test_manager();
        let mut claims = manager
            .validate(&manager.sign(&authenticated_subject(), Duration::hours(1)).unwrap())
            .unwrap();

        claims.exp = Some((Utc::now() - Duration::days(31)).timestamp());
        claims.refresh_until = Some((Utc::now() - Duration::seconds(1)).timestamp());
        let token = manager.encode(&claims).unwrap();

        assert_eq!(
            manager.refresh(&token, Duration::hours(1)),
            Err(TokenError::RefreshWindowClosed)
        );
    }

    #[test]
    fn test_refresh_rejects_anonymous_token() {
        let manager = test_manager();
        let token = manager.sign(&anonymous_subject(), Duration::zero()).unwrap();

        assert_eq!(
            manager.refresh(&token, Duration::hours(1)),
            Err(TokenError::AnonymousNotRefreshable)
        );
    }

    #[test]
    fn test_public_key_pem_is_exposed() {
        let manager = test_manager();
        assert!(manager.public_key_pem().contains("BEGIN PUBLIC KEY"));
    }
}
