//! # Authentication Interceptor
//!
//! Per-request credential admission for every API call.
//!
//! ## Admission Flow
//!
//! ```text
//! ┌─────────┐    ┌──────────────────┐    ┌──────────────────────────────┐
//! │ Request │───►│ Authorization?   │ no │ public procedure? ──► permit │
//! └─────────┘    │                  │───►│ otherwise        ──► 401    │
//!                └────────┬─────────┘    └──────────────────────────────┘
//!                         │ yes
//!                         ▼
//!                ┌──────────────────┐
//!                │ verify signature │──► bad ──► 401 (undifferentiated)
//!                │ (expiry ignored) │
//!                └────────┬─────────┘
//!                         │ ok
//!            ┌────────────┴─────────────┐
//!            ▼                          ▼
//!     anonymous token          authenticated token
//!     attach identity,         check expiry:
//!     continue                 - live            ──► attach, continue
//!                              - expired, within refresh window,
//!                                target is the refresh procedure
//!                                                ──► attach grace, continue
//!                              - otherwise       ──► 401
//! ```
//!
//! ## Identity Context
//!
//! Admission attaches a typed [`Identity`] to the request extensions, and
//! handlers extract it as a parameter - no stringly-keyed value bags:
//!
//! ```rust,ignore
//! async fn me(identity: Identity) -> Result<HttpResponse, ApiError> {
//!     match identity {
//!         Identity::Authenticated { user_id, .. } => { ... }
//!         Identity::Anonymous { session_id, .. } => { ... }
//!         _ => Err(ApiError::Unauthenticated),
//!     }
//! }
//! ```

use crate::auth::token::{Claims, TokenManager};
use crate::errors::ApiError;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use chrono::Utc;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::sync::Arc;

// =============================================================================
// Identity
// =============================================================================

/// The caller's identity as established by the interceptor.
///
/// `RefreshGrace` carries an expired-but-refreshable claim set and is
/// consumable only by the refresh procedure - no other handler accepts it.
#[derive(Debug, Clone)]
pub enum Identity {
    /// No credentials presented (public procedure).
    None,

    /// Holder of an anonymous token.
    Anonymous {
        /// Session the token is bound to
        session_id: String,
        /// Claimed handle
        username: String,
    },

    /// Holder of a live authenticated token.
    Authenticated {
        /// Subject user id
        user_id: String,
        /// Session the token is bound to
        session_id: String,
        /// Public handle
        username: String,
    },

    /// Holder of an expired token still inside its refresh window,
    /// admitted only toward the refresh procedure.
    RefreshGrace {
        /// The expired token's full claim set
        claims: Claims,
    },
}

impl Identity {
    /// Session id carried by the identity, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Identity::Anonymous { session_id, .. }
            | Identity::Authenticated { session_id, .. } => Some(session_id),
            Identity::RefreshGrace { claims } => Some(&claims.session_id),
            Identity::None => None,
        }
    }

    /// Returns `true` for the anonymous variant.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous { .. })
    }
}

/// Extractor: pulls the [`Identity`] the interceptor attached.
///
/// Resolves to `Identity::None` when the interceptor was not applied or the
/// request carried no credentials.
impl actix_web::FromRequest for Identity {
    type Error = Error;
    type Future = std::future::Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        let identity = req
            .extensions()
            .get::<Identity>()
            .cloned()
            .unwrap_or(Identity::None);

        std::future::ready(Ok(identity))
    }
}

// =============================================================================
// Procedure Classification
// =============================================================================

/// Procedures callable without credentials.
const PUBLIC_PROCEDURES: &[&str] = &[
    "/api/v1/auth/check-username",
    "/api/v1/auth/init-anonymous",
    "/api/v1/auth/authenticate",
    "/api/v1/auth/refresh-token",
    "/auth/refresh",
    "/auth/public-key",
    "/health",
];

/// Procedures the refresh grace admits a caller toward.
const REFRESH_PROCEDURES: &[&str] = &["/api/v1/auth/refresh-token", "/auth/refresh"];

/// Returns `true` when the path needs no credentials.
///
/// The browser-facing OAuth endpoints are public by nature: the caller has
/// no token yet, that's the point of the flow.
fn is_public(path: &str) -> bool {
    PUBLIC_PROCEDURES.contains(&path) || path.starts_with("/auth/oauth/")
}

/// Returns `true` when the path is a refresh procedure.
fn is_refresh(path: &str) -> bool {
    REFRESH_PROCEDURES.contains(&path)
}

// =============================================================================
// Interceptor
// =============================================================================

/// Cross-cutting admission filter applied to every API call.
///
/// ## Setup
///
/// ```rust,ignore
/// let interceptor = AuthInterceptor::new(token_manager.clone());
///
/// App::new()
///     .wrap(interceptor)
///     .configure(routes::configure)
/// ```
#[derive(Clone)]
pub struct AuthInterceptor {
    /// Token service for signature and expiry checks
    token_manager: Arc<TokenManager>,
}

impl AuthInterceptor {
    /// Creates a new interceptor.
    pub fn new(token_manager: Arc<TokenManager>) -> Self {
        Self { token_manager }
    }

    /// Core admission decision.
    ///
    /// `authorization` is the raw `Authorization` header value, if present.
    /// Returns the identity to attach, or `Unauthenticated` - without
    /// disclosing which check failed.
    pub fn admit(
        &self,
        path: &str,
        authorization: Option<&str>,
    ) -> Result<Identity, ApiError> {
        let raw = match authorization {
            None => {
                // No credentials: public procedures pass, everything else
                // is rejected.
                return if is_public(path) {
                    Ok(Identity::None)
                } else {
                    Err(ApiError::Unauthenticated)
                };
            }
            Some(value) => value,
        };

        // The Bearer prefix is conventional but optional
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        if token.is_empty() {
            return Err(ApiError::Unauthenticated);
        }

        // Phase one: signature/issuer/audience only, so the type claim can
        // be inspected before expiry policy is applied.
        let claims = self
            .token_manager
            .validate_ignoring_expiry(token)
            .map_err(|_| ApiError::Unauthenticated)?;

        if claims.is_anonymous {
            // Anonymous tokens carry no expiry; nothing more to enforce.
            return Ok(Identity::Anonymous {
                session_id: claims.session_id,
                username: claims.username,
            });
        }

        // Phase two: expiry policy for authenticated tokens.
        let now = Utc::now().timestamp();
        let expired = claims.exp.map(|exp| now > exp).unwrap_or(false);

        if !expired {
            return Ok(Identity::Authenticated {
                user_id: claims.sub.clone(),
                session_id: claims.session_id.clone(),
                username: claims.username.clone(),
            });
        }

        // Expired: admissible only toward the refresh procedure, and only
        // while the refresh window is open.
        let within_window = claims.refresh_until.map(|ru| now <= ru).unwrap_or(false);
        if within_window && is_refresh(path) {
            return Ok(Identity::RefreshGrace { claims });
        }

        Err(ApiError::Unauthenticated)
    }
}

// =============================================================================
// Actix-web Middleware Plumbing
// =============================================================================

impl<S, B> Transform<S, ServiceRequest> for AuthInterceptor
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthInterceptorMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthInterceptorMiddleware {
            service,
            token_manager: self.token_manager.clone(),
        }))
    }
}

/// The per-worker middleware instance produced by [`AuthInterceptor`].
pub struct AuthInterceptorMiddleware<S> {
    service: S,
    token_manager: Arc<TokenManager>,
}

impl<S, B> Service<ServiceRequest> for AuthInterceptorMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let authorization = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .map(str::to_owned);

        let interceptor = AuthInterceptor {
            token_manager: self.token_manager.clone(),
        };

        match interceptor.admit(req.path(), authorization.as_deref()) {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
                let fut = self.service.call(req);
                Box::pin(fut)
            }
            Err(err) => Box::pin(ready(Err(err.into()))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
