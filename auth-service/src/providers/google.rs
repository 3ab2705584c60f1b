//! # Google Provider
//!
//! OAuth 2.0 authorization-code flow against Google, plus direct ID-token
//! verification for clients that obtained a Google credential natively.
//!
//! ## Endpoints
//!
//! | Purpose | Endpoint |
//! |---------|----------|
//! | Authorization | `accounts.google.com/o/oauth2/v2/auth` |
//! | Code exchange | `oauth2.googleapis.com/token` |
//! | User info | `www.googleapis.com/oauth2/v3/userinfo` |
//! | ID-token check | `oauth2.googleapis.com/tokeninfo` |
//!
//! ## Credential Dispatch
//!
//! `authenticate` accepts either a Google access token or a Google ID
//! token. An ID token is a JWS - three dot-separated segments - so a
//! credential containing two dots selects the tokeninfo verification path,
//! which also checks that the token's audience is *our* client id (a token
//! minted for another app must not sign users in here).
//!
//! ## Availability
//!
//! The provider is registered only when `GOOGLE_CLIENT_ID` and
//! `GOOGLE_CLIENT_SECRET` are configured; without them the service runs
//! with the anonymous provider alone.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{ExchangedTokens, OAuthProvider, ProviderError};
use crate::domain::UserInfo;
use shared::config::GoogleConfig;

/// Registry name of this provider.
pub const PROVIDER_NAME: &str = "google";

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Scopes requested for sign-in.
const SCOPES: &str = "openid email profile";

/// Total timeout for provider round-trips.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Userinfo endpoint response (OpenID Connect shape).
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
    #[serde(default)]
    picture: String,
}

/// Tokeninfo endpoint response. Google encodes booleans as strings here.
#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    aud: String,
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
    #[serde(default)]
    picture: String,
}

// =============================================================================
// PROVIDER
// =============================================================================

/// Google OAuth 2.0 provider.
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    /// Pooled HTTP client with a bounded total timeout
    http: reqwest::Client,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    tokeninfo_url: String,
}

impl GoogleProvider {
    /// Creates the provider from configuration.
    ///
    /// ## Errors
    ///
    /// `Config` when client id, secret, or redirect URL are missing.
    pub fn new(config: &GoogleConfig) -> Result<Self, ProviderError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| ProviderError::Config("GOOGLE_CLIENT_ID missing".to_string()))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| ProviderError::Config("GOOGLE_CLIENT_SECRET missing".to_string()))?;
        let redirect_url = config
            .redirect_url
            .clone()
            .ok_or_else(|| ProviderError::Config("GOOGLE_REDIRECT_URL missing".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_url,
            http,
            auth_url: AUTH_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
            tokeninfo_url: TOKENINFO_URL.to_string(),
        })
    }

    /// Test constructor pointing every endpoint at a mock server.
    #[cfg(test)]
    fn with_endpoints(client_id: &str, client_secret: &str, redirect_url: &str, base: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_url: redirect_url.to_string(),
            http: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build().unwrap(),
            auth_url: format!("{}/auth", base),
            token_url: format!("{}/token", base),
            userinfo_url: format!("{}/userinfo", base),
            tokeninfo_url: format!("{}/tokeninfo", base),
        }
    }

    /// Verifies a Google ID token via the tokeninfo endpoint.
    ///
    /// The audience check is the important one: tokeninfo accepts any valid
    /// Google ID token, so the provider must confirm the token was minted
    /// for this application.
    async fn verify_id_token(&self, id_token: &str) -> Result<UserInfo, ProviderError> {
        let response = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ProviderError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(ProviderError::Http(format!("tokeninfo returned {}", status)));
        }

        let info: TokenInfoResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if info.aud != self.client_id {
            warn!(aud = %info.aud, "ID token minted for a different audience");
            return Err(ProviderError::InvalidCredentials);
        }

        let email_verified = info.email_verified == "true";
        Ok(self.to_user_info(
            info.sub,
            info.email,
            email_verified,
            info.name,
            info.given_name,
            info.family_name,
            info.picture,
        ))
    }

    /// Normalizes Google identity fields into [`UserInfo`].
    #[allow(clippy::too_many_arguments)]
    fn to_user_info(
        &self,
        sub: String,
        email: String,
        email_verified: bool,
        name: String,
        given_name: String,
        family_name: String,
        picture: String,
    ) -> UserInfo {
        // Google has no username concept; the proposed handle falls back to
        // the email, then to the subject id.
        let username = if !email.is_empty() { email.clone() } else { sub.clone() };

        UserInfo {
            id: sub.clone(),
            email,
            username,
            first_name: given_name,
            last_name: family_name,
            name,
            picture,
            email_verified,
            verified_at: email_verified.then(Utc::now),
            provider: PROVIDER_NAME.to_string(),
            metadata: serde_json::json!({ "sub": sub }),
        }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("state", state),
                ("access_type", "offline"),
            ],
        )
        .map_err(|e| ProviderError::Config(format!("authorization url: {}", e)))?;

        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<ExchangedTokens, ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            // Expired or already-used code
            return Err(ProviderError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(ProviderError::Http(format!("token endpoint returned {}", status)));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        debug!("Authorization code exchanged");

        Ok(ExchangedTokens {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ProviderError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(ProviderError::Http(format!("userinfo returned {}", status)));
        }

        let info: GoogleUserInfo = response
            .json()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        Ok(self.to_user_info(
            info.sub,
            info.email,
            info.email_verified,
            info.name,
            info.given_name,
            info.family_name,
            info.picture,
        ))
    }

    async fn authenticate(&self, credential: &str) -> Result<UserInfo, ProviderError> {
        // Two dots mark a JWS: header.payload.signature. Anything else is
        // treated as an access token.
        if credential.matches('.').count() == 2 {
            self.verify_id_token(credential).await
        } else {
            self.fetch_user_info(credential).await
        }
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(ProviderError::Config(
                "google client id/secret must be non-empty".to_string(),
            ));
        }
        if self.redirect_url.is_empty() {
            return Err(ProviderError::Config(
                "google redirect url must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: &str) -> GoogleProvider {
        GoogleProvider::with_endpoints(
            "client-123.apps.googleusercontent.com",
            "secret",
            "https://api.plaza.app/auth/oauth/google/callback",
            base,
        )
    }

    #[test]
    fn test_authorization_url_carries_flow_parameters() {
        let provider = provider("https://example.com");
        let url = provider.authorization_url("sealed-state").unwrap();

        assert!(url.starts_with("https://example.com/auth?"));
        assert!(url.contains("client_id=client-123.apps.googleusercontent.com"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=sealed-state"));
        assert!(url.contains("scope=openid+email+profile"));
    }

    #[tokio::test]
    async fn test_exchange_code_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.test",
                "refresh_token": "1//refresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let tokens = provider(&server.uri()).exchange_code("4/code").await.unwrap();

        assert_eq!(tokens.access_token, "ya29.test");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
        assert!(tokens.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_exchange_rejected_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let result = provider(&server.uri()).exchange_code("bad").await;
        assert!(matches!(result, Err(ProviderError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_fetch_user_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "10203040",
                "email": "explorer@example.com",
                "email_verified": true,
                "name": "Jakarta Explorer",
                "given_name": "Jakarta",
                "family_name": "Explorer",
                "picture": "https://lh3.example/photo.jpg"
            })))
            .mount(&server)
            .await;

        let info = provider(&server.uri()).fetch_user_info("ya29.test").await.unwrap();

        assert_eq!(info.id, "10203040");
        assert_eq!(info.provider, "google");
        assert_eq!(info.email, "explorer@example.com");
        // Username falls back to the email
        assert_eq!(info.username, "explorer@example.com");
        assert!(info.email_verified);
        assert!(info.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_id_token_path_verifies_audience() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .and(query_param("id_token", "a.b.c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "aud": "client-123.apps.googleusercontent.com",
                "sub": "10203040",
                "email": "explorer@example.com",
                "email_verified": "true",
                "name": "Jakarta Explorer"
            })))
            .mount(&server)
            .await;

        // Two dots select the tokeninfo path
        let info = provider(&server.uri()).authenticate("a.b.c").await.unwrap();

        assert_eq!(info.id, "10203040");
        assert!(info.email_verified);
    }

    #[tokio::test]
    async fn test_id_token_with_foreign_audience_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "aud": "someone-else.apps.googleusercontent.com",
                "sub": "10203040",
                "email": "explorer@example.com",
                "email_verified": "true"
            })))
            .mount(&server)
            .await;

        let result = provider(&server.uri()).authenticate("a.b.c").await;
        assert!(matches!(result, Err(ProviderError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_access_token_credential_uses_userinfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "10203040",
                "email": "explorer@example.com",
                "email_verified": true
            })))
            .mount(&server)
            .await;

        // No dots: treated as an access token
        let info = provider(&server.uri()).authenticate("ya29-opaque").await.unwrap();
        assert_eq!(info.id, "10203040");
    }

    #[tokio::test]
    async fn test_expired_access_token_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = provider(&server.uri()).authenticate("stale-token").await;
        assert!(matches!(result, Err(ProviderError::InvalidCredentials)));
    }

    #[test]
    fn test_validate_config() {
        let good = provider("https://example.com");
        assert!(good.validate_config().is_ok());

        let bad = GoogleProvider::with_endpoints("", "secret", "https://cb", "https://example.com");
        assert!(matches!(bad.validate_config(), Err(ProviderError::Config(_))));
    }

    #[test]
    fn test_new_requires_full_configuration() {
        let result = GoogleProvider::new(&GoogleConfig {
            client_id: Some("id".to_string()),
            client_secret: None,
            redirect_url: None,
        });
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }
}
