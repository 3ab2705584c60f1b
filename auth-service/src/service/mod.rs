//! # Service Layer
//!
//! Core business logic for the authentication operations. The orchestrator
//! composes the leaf services; nothing below it knows about HTTP, nothing
//! above it knows about providers or stores.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            API Layer                                    │
//! │                      (HTTP handlers, DTOs)                              │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         AuthOrchestrator                                │
//! │   check_username / init_anonymous / authenticate / refresh_token /     │
//! │   oauth_initiate / oauth_callback                                       │
//! └───────┬───────────┬────────────┬─────────────┬──────────────┬──────────┘
//!         │           │            │             │              │
//!         ▼           ▼            ▼             ▼              ▼
//!     UserStore  SessionMgr  ProviderRegistry  TokenManager  StateManager
//! ```
//!
//! ## Operation Responsibilities
//!
//! | Operation         | Validation              | Side Effects               |
//! |-------------------|-------------------------|----------------------------|
//! | `check_username`  | format rules            | none                       |
//! | `init_anonymous`  | handle availability     | anonymous session          |
//! | `authenticate`    | provider verification   | user row, session, migrate |
//! | `refresh_token`   | refresh-window policy   | none (stateless)           |
//! | `oauth_initiate`  | redirect URI, provider  | none (state is sealed)     |
//! | `oauth_callback`  | sealed state, code      | user row, session, migrate |

pub mod orchestrator;

pub use orchestrator::{
    AnonymousGrant, AuthGrant, AuthOrchestrator, CallbackOutcome, CheckUsernameOutcome,
};
