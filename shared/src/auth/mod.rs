//! # Authentication Primitives
//!
//! Cross-cutting credential machinery shared by the auth service and any
//! future service that needs to validate Plaza bearer tokens.
//!
//! ## Module Structure
//!
//! ```text
//! auth/
//! ├── token.rs       - RS256 bearer tokens with a refresh window
//! ├── state.rs       - AES-256-GCM sealed OAuth state
//! └── interceptor.rs - per-request admission and typed identity
//! ```
//!
//! ## Overview
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`TokenManager`] | Sign, validate, and refresh bearer tokens |
//! | [`StateManager`] | Seal/open the OAuth `state` parameter |
//! | [`AuthInterceptor`] | Admission filter attaching [`Identity`] to requests |
//!
//! ## Credential Model
//!
//! ```text
//! ┌────────┐         ┌──────────────┐          ┌───────────────┐
//! │ Client │         │ Auth Service │          │ Other Service │
//! └───┬────┘         └──────┬───────┘          └──────┬────────┘
//!     │ init-anonymous /    │                         │
//!     │ authenticate        │                         │
//!     │────────────────────>│                         │
//!     │   token (RS256)     │                         │
//!     │<────────────────────│                         │
//!     │                     │                         │
//!     │ Authorization: Bearer <token>                 │
//!     │──────────────────────────────────────────────>│
//!     │                     │     verify with the     │
//!     │                     │     public key alone    │
//! ```

pub mod interceptor;
pub mod state;
pub mod token;

// Re-export main types for convenient access
pub use interceptor::{AuthInterceptor, Identity};
pub use state::{StateEnvelope, StateError, StateManager};
pub use token::{Claims, TokenError, TokenManager, TokenSubject, TokenType};
