//! # Route Configuration
//!
//! Defines URL patterns and maps them to handler functions.
//!
//! ## Route Structure
//!
//! ```text
//! /
//! ├── health                               GET  → health_check
//! │
//! ├── api/v1/auth/
//! │   ├── check-username                   POST → check_username
//! │   ├── init-anonymous                   POST → init_anonymous
//! │   ├── authenticate                     POST → authenticate
//! │   ├── refresh-token                    POST → refresh_token
//! │   └── me                               GET  → me
//! │
//! └── auth/
//!     ├── oauth/{provider}                 GET  → oauth_initiate
//!     ├── oauth/{provider}/callback        GET  → oauth_callback
//!     ├── refresh                          POST → browser_refresh
//!     └── public-key                       GET  → public_key
//! ```
//!
//! ## Authentication
//!
//! The `AuthInterceptor` middleware (applied in `main.rs`) gates every
//! route: the procedures above are on its public allowlist except `me`,
//! which requires a bearer token; `refresh-token` additionally admits
//! expired tokens still inside their refresh window.

use actix_web::web;

use super::handlers;

/// Configures all routes for the auth service.
///
/// Called from `main.rs` during app initialization:
///
/// ```rust,ignore
/// App::new()
///     .configure(routes::configure)
/// ```
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // ─────────────────────────────────────────────────────────────────
        // Health Check
        // ─────────────────────────────────────────────────────────────────
        .route("/health", web::get().to(handlers::health_check))
        // ─────────────────────────────────────────────────────────────────
        // RPC procedures
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/api/v1/auth")
                //
                // POST /api/v1/auth/check-username
                // Request: CheckUsernameRequest { username }
                // Response: CheckUsernameResponse { available, message? }
                .route("/check-username", web::post().to(handlers::check_username))
                //
                // POST /api/v1/auth/init-anonymous
                // Request: InitAnonymousRequest { username }
                // Response: InitAnonymousResponse { token, sessionId, username }
                .route("/init-anonymous", web::post().to(handlers::init_anonymous))
                //
                // POST /api/v1/auth/authenticate
                // Request: AuthenticateRequest { provider, credential, sessionId? }
                // Response: AuthenticateResponse { token, user, sessionMigrated }
                .route("/authenticate", web::post().to(handlers::authenticate))
                //
                // POST /api/v1/auth/refresh-token
                // Request: RefreshTokenRequest { expiredToken }
                // Response: TokenResponse { token }
                .route("/refresh-token", web::post().to(handlers::refresh_token))
                //
                // GET /api/v1/auth/me
                // Headers: Authorization: Bearer <token>
                // Response: IdentityResponse
                .route("/me", web::get().to(handlers::me)),
        )
        // ─────────────────────────────────────────────────────────────────
        // Browser-facing OAuth endpoints
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/auth")
                //
                // GET /auth/oauth/{provider}?redirect_uri=...&session_id=...
                // 307 to the provider's authorization endpoint
                .route("/oauth/{provider}", web::get().to(handlers::oauth_initiate))
                //
                // GET /auth/oauth/{provider}/callback?code=...&state=...
                // Web: 307 to redirect_uri#token=...; mobile: JSON
                .route(
                    "/oauth/{provider}/callback",
                    web::get().to(handlers::oauth_callback),
                )
                //
                // POST /auth/refresh
                // Request: { expired_token }
                // Response: TokenResponse { token }
                .route("/refresh", web::post().to(handlers::browser_refresh))
                //
                // GET /auth/public-key
                // Response: PublicKeyResponse { public_key, algorithm }
                .route("/public-key", web::get().to(handlers::public_key)),
        );
}
