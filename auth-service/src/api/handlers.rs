//! # Request Handlers
//!
//! HTTP request handlers bridging the API layer with the orchestrator.
//! Each handler follows the same pattern:
//!
//! 1. **Extract** request data using Actix extractors
//! 2. **Validate** input using the `validator` crate
//! 3. **Call** the orchestrator
//! 4. **Transform** and return the HTTP response
//!
//! ## Error Handling
//!
//! All handlers return `Result<HttpResponse, ApiError>`; the `ApiError`
//! type converts to HTTP responses via its `ResponseError` implementation.
//!
//! ## Client Classification
//!
//! The OAuth callback answers two kinds of client:
//!
//! | Client | Detection | Response |
//! |--------|-----------|----------|
//! | Mobile | `X-Client-Type: mobile` or a mobile User-Agent | JSON body |
//! | Web | everything else | 307 to `redirect_uri#token=...` |
//!
//! The token travels in the URL **fragment** for web clients so it never
//! appears in server logs on the next hop.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use shared::auth::Identity;
use shared::{database, errors::ApiError, validation};

use crate::AppState;

use super::dto::{
    AuthenticateRequest, AuthenticateResponse, CallbackMobileResponse, CheckUsernameRequest,
    CheckUsernameResponse, HealthResponse, IdentityResponse, InitAnonymousRequest,
    InitAnonymousResponse, OAuthCallbackQuery, OAuthInitQuery, PublicKeyResponse,
    RefreshTokenRequest, TokenResponse,
};

/// User-Agent fragments that mark a mobile client.
const MOBILE_UA_PATTERNS: &[&str] = &[
    "ios",
    "iphone",
    "ipad",
    "android",
    "mobile",
    "react-native",
    "flutter",
];

/// Deadline for the health probe's database ping.
const HEALTH_PING_DEADLINE: Duration = Duration::from_secs(2);

// =============================================================================
// HEALTH CHECK
// =============================================================================

/// Health check endpoint for monitoring and load balancers.
///
/// # Route
///
/// `GET /health`
///
/// # Responses
///
/// - **200 OK**: database answered the ping within 2 seconds
/// - **503 Service Unavailable**: it did not
pub async fn health_check(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    database::ping(pool.get_ref(), HEALTH_PING_DEADLINE).await?;

    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "auth-service".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

// =============================================================================
// RPC PROCEDURES
// =============================================================================

/// Checks whether a username can be claimed.
///
/// # Route
///
/// `POST /api/v1/auth/check-username`
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/v1/auth/check-username \
///   -H "Content-Type: application/json" \
///   -d '{"username":"jakarta_explorer"}'
/// ```
pub async fn check_username(
    state: web::Data<AppState>,
    body: web::Json<CheckUsernameRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let outcome = state.orchestrator.check_username(&body.username).await?;

    Ok(HttpResponse::Ok().json(CheckUsernameResponse {
        available: outcome.available,
        message: outcome.message,
    }))
}

/// Bootstraps an anonymous identity.
///
/// # Route
///
/// `POST /api/v1/auth/init-anonymous`
///
/// # Responses
///
/// - **200 OK**: token + session issued
/// - **409 Conflict**: username already taken
pub async fn init_anonymous(
    state: web::Data<AppState>,
    body: web::Json<InitAnonymousRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let grant = state.orchestrator.init_anonymous(&body.username).await?;

    Ok(HttpResponse::Ok().json(InitAnonymousResponse {
        token: grant.token,
        session_id: grant.session_id,
        username: grant.username,
    }))
}

/// Authenticates a provider credential.
///
/// # Route
///
/// `POST /api/v1/auth/authenticate`
///
/// # Responses
///
/// - **200 OK**: authenticated (or sign-in link dispatched: empty token)
/// - **401 Unauthorized**: credentials rejected
/// - **403 Forbidden**: account disabled
/// - **404 Not Found**: unknown provider
/// - **412 Precondition Failed**: email not verified
pub async fn authenticate(
    state: web::Data<AppState>,
    body: web::Json<AuthenticateRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let grant = state
        .orchestrator
        .authenticate(&body.provider, &body.credential, body.session_id.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(AuthenticateResponse {
        token: grant.token,
        user: grant.user,
        session_migrated: grant.session_migrated,
    }))
}

/// Exchanges an expired token for a fresh one.
///
/// # Route
///
/// `POST /api/v1/auth/refresh-token`
///
/// The interceptor admits the expired token here (and only here) while its
/// refresh window is open.
pub async fn refresh_token(
    state: web::Data<AppState>,
    body: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let token = state.orchestrator.refresh_token(&body.expired_token).await?;

    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

/// Returns the caller's identity as established by the interceptor.
///
/// # Route
///
/// `GET /api/v1/auth/me`
///
/// Anonymous callers get their session id and handle; authenticated
/// callers get their full profile.
pub async fn me(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    match identity {
        Identity::Authenticated { user_id, session_id, username } => {
            let user_id = Uuid::parse_str(&user_id).map_err(|_| ApiError::Unauthenticated)?;
            let profile = state.orchestrator.get_profile(user_id).await?;

            Ok(HttpResponse::Ok().json(IdentityResponse {
                auth_type: "authenticated".to_string(),
                session_id,
                username,
                user: Some(profile),
            }))
        }
        Identity::Anonymous { session_id, username } => {
            Ok(HttpResponse::Ok().json(IdentityResponse {
                auth_type: "anonymous".to_string(),
                session_id,
                username,
                user: None,
            }))
        }
        Identity::None | Identity::RefreshGrace { .. } => Err(ApiError::Unauthenticated),
    }
}

// =============================================================================
// BROWSER-FACING OAUTH ENDPOINTS
// =============================================================================

/// Starts a browser OAuth flow.
///
/// # Route
///
/// `GET /auth/oauth/{provider}?redirect_uri=...&session_id=...`
///
/// # Responses
///
/// - **307 Temporary Redirect**: to the provider's authorization endpoint
/// - **400 Bad Request**: missing redirect_uri
/// - **404 Not Found**: unknown provider
pub async fn oauth_initiate(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<OAuthInitQuery>,
) -> Result<HttpResponse, ApiError> {
    let provider = path.into_inner();
    let query = query.into_inner();

    let url = state
        .orchestrator
        .oauth_initiate(&provider, &query.redirect_uri, query.session_id)
        .await?;

    Ok(HttpResponse::TemporaryRedirect()
        .insert_header(("Location", url))
        .finish())
}

/// Completes a browser OAuth flow.
///
/// # Route
///
/// `GET /auth/oauth/{provider}/callback?code=...&state=...`
///
/// # Responses
///
/// - **307 Temporary Redirect** (web): `redirect_uri#token=<jwt>`
/// - **200 OK** (mobile): JSON `{token, user, session_migrated}`
/// - **401 Unauthorized**: the provider reported an error
/// - **400 Bad Request**: missing parameters or invalid state
pub async fn oauth_callback(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<OAuthCallbackQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();

    // Provider-reported failure (user denied consent, etc.)
    if let Some(error) = query.error {
        warn!(error = %error, "Provider reported an OAuth error");
        return Ok(HttpResponse::Unauthorized().json(serde_json::json!({
            "error": error,
            "error_description": query.error_description,
        })));
    }

    let code = query.code.unwrap_or_default();
    let sealed_state = query.state.unwrap_or_default();
    if code.is_empty() || sealed_state.is_empty() {
        return Err(ApiError::InvalidArgument {
            message: "code and state are required".to_string(),
        });
    }

    let outcome = state.orchestrator.oauth_callback(&code, &sealed_state).await?;

    if is_mobile_client(&req) {
        info!("OAuth callback answered as JSON (mobile client)");
        return Ok(HttpResponse::Ok().json(CallbackMobileResponse {
            token: outcome.grant.token,
            user: outcome.grant.user,
            session_migrated: outcome.grant.session_migrated,
        }));
    }

    let location = callback_location(
        &outcome.redirect_uri,
        &outcome.grant.token,
        outcome.grant.session_migrated,
    );

    Ok(HttpResponse::TemporaryRedirect()
        .insert_header(("Location", location))
        .finish())
}

/// Browser refresh endpoint.
///
/// # Route
///
/// `POST /auth/refresh`
///
/// Body: `{"expired_token": "..."}`. Response: `{"token": "..."}` or 401.
pub async fn browser_refresh(
    state: web::Data<AppState>,
    body: web::Json<RefreshTokenRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let token = state.orchestrator.refresh_token(&body.expired_token).await?;

    Ok(HttpResponse::Ok().json(TokenResponse { token }))
}

/// Exposes the token verification key.
///
/// # Route
///
/// `GET /auth/public-key`
///
/// Out-of-process validators fetch this once and verify bearer tokens
/// without ever holding signing material.
pub async fn public_key(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(PublicKeyResponse {
        public_key: state.orchestrator.public_key_pem().to_string(),
        algorithm: "RS256".to_string(),
    }))
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Classifies the callback's client.
///
/// Mobile iff the request carries `X-Client-Type: mobile` or the
/// User-Agent matches a known mobile pattern (case-insensitive).
fn is_mobile_client(req: &HttpRequest) -> bool {
    if let Some(client_type) = req.headers().get("X-Client-Type") {
        if client_type.to_str().map(|v| v.eq_ignore_ascii_case("mobile")).unwrap_or(false) {
            return true;
        }
    }

    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    MOBILE_UA_PATTERNS.iter().any(|p| user_agent.contains(p))
}

/// Builds the web client's redirect target.
///
/// The token rides in the fragment, which browsers do not send to the
/// server at `redirect_uri`, keeping it out of that hop's access logs.
fn callback_location(redirect_uri: &str, token: &str, session_migrated: bool) -> String {
    let mut location = format!("{}#token={}", redirect_uri, token);
    if session_migrated {
        location.push_str("&session_migrated=true");
    }
    location
}

// =============================================================================
// TESTS
// =============================================================================
