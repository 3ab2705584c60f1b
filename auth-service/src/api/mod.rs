//! # API Layer
//!
//! HTTP request/response processing for the authentication endpoints. It
//! bridges the HTTP world with the orchestrator.
//!
//! ## Module Organization
//!
//! | Module       | Responsibility                                      |
//! |--------------|-----------------------------------------------------|
//! | `routes`     | Route definitions with actix-web's `configure()`    |
//! | `handlers`   | Request handlers (extractors → orchestrator → response) |
//! | `dto`        | Data Transfer Objects for request/response          |
//!
//! ## Endpoint Summary
//!
//! | Method | Path                              | Handler          | Auth |
//! |--------|-----------------------------------|------------------|------|
//! | POST   | `/api/v1/auth/check-username`     | `check_username` | No   |
//! | POST   | `/api/v1/auth/init-anonymous`     | `init_anonymous` | No   |
//! | POST   | `/api/v1/auth/authenticate`       | `authenticate`   | No   |
//! | POST   | `/api/v1/auth/refresh-token`      | `refresh_token`  | No*  |
//! | GET    | `/api/v1/auth/me`                 | `me`             | Yes  |
//! | GET    | `/auth/oauth/{provider}`          | `oauth_initiate` | No   |
//! | GET    | `/auth/oauth/{provider}/callback` | `oauth_callback` | No   |
//! | POST   | `/auth/refresh`                   | `browser_refresh`| No*  |
//! | GET    | `/auth/public-key`                | `public_key`     | No   |
//! | GET    | `/health`                         | `health_check`   | No   |
//!
//! *An expired bearer inside its refresh window is admitted here.

pub mod dto;
pub mod handlers;
pub mod routes;
