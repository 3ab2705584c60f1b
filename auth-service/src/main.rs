//! # Plaza - Authentication Service
//!
//! The **auth-service** is the identity core of the Plaza location-based
//! social service: a stateless, multi-provider subsystem that issues,
//! validates, and refreshes bearer credentials across anonymous and OAuth
//! flows, and migrates anonymous activity into named accounts.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HTTP Layer (api/)                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │   routes    │  │  handlers   │  │    DTOs (Request/Res)   │  │
//! │  └──────┬──────┘  └──────┬──────┘  └────────────┬────────────┘  │
//! └─────────┼────────────────┼─────────────────────┼────────────────┘
//!           │         AuthInterceptor (shared)      │
//!           ▼                ▼                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Service Layer (service/)                       │
//! │    AuthOrchestrator: check-username, init-anonymous,            │
//! │    authenticate, refresh, oauth initiate/callback               │
//! └──────┬──────────┬───────────┬────────────┬───────────┬─────────┘
//!        │          │           │            │           │
//!        ▼          ▼           ▼            ▼           ▼
//!   repository/  session/   providers/   TokenManager StateManager
//!   (PgUserStore)(stores +  (anonymous,   (shared)     (shared)
//!                 manager)   google)
//! ```
//!
//! ## Credential Model
//!
//! | Token | Expiry | Subject |
//! |-------|--------|---------|
//! | Anonymous | never | session id |
//! | Authenticated | 1 h + 30-day refresh window | user id |
//!
//! ## Configuration
//!
//! Environment variables are loaded via [`shared::config::AppConfig`]. Key
//! settings:
//!
//! - `SERVER_ADDR`, `DATABASE_URL`, `REDIS_URL` (optional)
//! - `JWT_PRIVATE_KEY_PATH` / `JWT_PUBLIC_KEY_PATH` (dev pair generated
//!   when absent), `JWT_ISSUER`, `JWT_AUDIENCE`
//! - `OAUTH_STATE_KEY` (generated when absent)
//! - `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` / `GOOGLE_REDIRECT_URL`
//!   (the Google provider is disabled when unset)
//!
//! Configuration or bind failure exits non-zero; everything else is a
//! request-scoped error.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use shared::auth::{AuthInterceptor, StateManager, TokenManager};
use shared::{config::AppConfig, database, redis_client::RedisClient, tracing_config};

mod api;
mod domain;
mod providers;
mod repository;
mod service;
mod session;

use api::routes;
use providers::{AnonymousProvider, GoogleProvider, Provider, ProviderRegistry};
use repository::{PgUserStore, UserStore};
use service::AuthOrchestrator;
use session::{InMemorySessionStore, RedisSessionStore, SessionManager, SessionStore};

/// How often the background pruner sweeps expired sessions.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state injected into all request handlers.
pub struct AppState {
    /// The composed authentication service
    pub orchestrator: AuthOrchestrator,
}

/// Application entry point and server initialization.
///
/// # Initialization Sequence
///
/// 1. Load configuration from environment variables
/// 2. Initialize structured logging/tracing
/// 3. Create the PostgreSQL pool and pick the session store backend
/// 4. Build the credential primitives (token, state) and providers
/// 5. Compose the orchestrator and start the pruner task
/// 6. Configure and start the HTTP server
///
/// # Error Handling
///
/// Critical initialization uses `expect()` so the service fails fast with
/// a non-zero exit instead of limping along half-wired.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ─────────────────────────────────────────────────────────────────────
    // Step 1: Load configuration from environment
    // ─────────────────────────────────────────────────────────────────────
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // ─────────────────────────────────────────────────────────────────────
    // Step 2: Initialize structured logging
    // ─────────────────────────────────────────────────────────────────────
    tracing_config::init_tracing(&config.service_name, config.is_production());

    info!(
        service = %config.service_name,
        addr = %config.server.addr,
        "Starting auth-service"
    );

    // ─────────────────────────────────────────────────────────────────────
    // Step 3: Storage - PostgreSQL pool and session store backend
    // ─────────────────────────────────────────────────────────────────────
    let db_pool = database::create_pool(&config.database)
        .await
        .expect("Failed to create database pool");

    let session_store: Arc<dyn SessionStore> = match &config.redis.url {
        Some(url) => {
            let client = RedisClient::new(url).await.expect("Failed to connect to Redis");
            info!("Using the Redis session store");
            Arc::new(RedisSessionStore::new(client))
        }
        None => {
            warn!("REDIS_URL not set; using the in-memory session store (single instance only)");
            Arc::new(InMemorySessionStore::new())
        }
    };

    // ─────────────────────────────────────────────────────────────────────
    // Step 4: Credential primitives and providers
    // ─────────────────────────────────────────────────────────────────────
    let token_manager =
        Arc::new(TokenManager::from_config(&config.jwt).expect("Failed to build token manager"));
    let state_manager =
        Arc::new(StateManager::from_config(&config.oauth).expect("Failed to build state manager"));

    let user_store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db_pool.clone()));
    let session_manager = SessionManager::new(session_store, &config.session);

    let mut registry = ProviderRegistry::new();
    registry
        .register(Provider::Internal(Arc::new(AnonymousProvider::new(
            session_manager.clone(),
            user_store.clone(),
        ))))
        .expect("Failed to register the anonymous provider");

    if config.google.is_configured() {
        let google = GoogleProvider::new(&config.google).expect("Failed to build Google provider");
        registry
            .register(Provider::OAuth(Arc::new(google)))
            .expect("Failed to register the Google provider");
    } else {
        warn!("Google provider disabled: GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET not set");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Step 5: Compose the orchestrator and background pruning
    // ─────────────────────────────────────────────────────────────────────
    let orchestrator = AuthOrchestrator::new(
        user_store,
        session_manager.clone(),
        Arc::new(registry),
        token_manager.clone(),
        state_manager,
        &config.jwt,
    );

    // Cooperative sweep of expired authenticated sessions
    let pruner = session_manager.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            match pruner.prune_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Pruned expired sessions"),
                Err(e) => warn!(error = %e, "Session pruning failed"),
            }
        }
    });

    let app_state = web::Data::new(AppState { orchestrator });
    let db_pool = web::Data::new(db_pool);
    let interceptor = AuthInterceptor::new(token_manager);

    // ─────────────────────────────────────────────────────────────────────
    // Step 6: Configure and start the HTTP server
    // ─────────────────────────────────────────────────────────────────────
    let addr = config.server.addr.clone();
    let workers = config.server.workers;

    info!("Server listening on {}", addr);

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            // Middleware stack (first added = last executed). The
            // interceptor sits innermost so CORS answers preflight
            // requests before admission runs.
            .wrap(interceptor.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(cors)
            // Shared state
            .app_data(app_state.clone())
            .app_data(db_pool.clone())
            // Routes
            .configure(routes::configure)
    });

    if workers > 0 {
        server = server.workers(workers);
    }

    server.bind(addr.as_str())?.run().await
}
