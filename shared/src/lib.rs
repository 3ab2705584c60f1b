//! # Plaza - Shared Library
//!
//! Core shared functionality for the Plaza backend services.
//!
//! This crate provides common utilities, types, and services used across
//! the backend. It follows the DRY principle to avoid code duplication and
//! ensure consistency.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Services                             │
//! │  ┌─────────┐ ┌──────────┐ ┌─────────┐                      │
//! │  │  Auth   │ │ Content  │ │  ...    │                      │
//! │  └────┬────┘ └────┬─────┘ └────┬────┘                      │
//! │       │           │            │                            │
//! │       └───────────┴────────────┘                            │
//! │                   │                                         │
//! │          ┌────────▼────────┐                                │
//! │          │  shared crate   │ ◄── You are here               │
//! │          └─────────────────┘                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`config`] | Environment-based configuration | [`AppConfig`] |
//! | [`errors`] | Standardized error handling | [`ApiError`], [`ApiResult`] |
//! | [`auth`] | Bearer tokens, sealed state, admission | [`auth::TokenManager`], [`auth::StateManager`], [`auth::AuthInterceptor`] |
//! | [`database`] | PostgreSQL connection pool | [`database::create_pool`] |
//! | [`redis_client`] | Redis for the session store | [`redis_client::RedisClient`] |
//! | [`tracing_config`] | Structured logging setup | [`tracing_config::init_tracing`] |
//! | [`validation`] | Request validation helpers | Custom validators |
//!
//! ## Design Decisions
//!
//! 1. **Single source of truth**: shared types live here to prevent drift
//! 2. **Asymmetric credentials**: tokens verify with a public key so other
//!    services never hold signing material
//! 3. **Security first**: credential failures are undifferentiated at the
//!    boundary
//! 4. **Observable by default**: structured logging and tracing built-in

pub mod auth;
pub mod config;
pub mod database;
pub mod errors;
pub mod redis_client;
pub mod tracing_config;
pub mod validation;

// Re-exports for convenience - import commonly used types directly from `shared`
pub use config::AppConfig;
pub use errors::{ApiError, ApiResult};
