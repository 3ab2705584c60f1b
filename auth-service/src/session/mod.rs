//! # Session Layer
//!
//! Session persistence and lifecycle.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       SessionManager                          │
//! │   create_anonymous / create_authenticated / validate /        │
//! │   migrate_to_user / prune_expired                             │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                │ SessionStore trait
//!                ┌───────────────┴───────────────┐
//!                ▼                               ▼
//!   ┌────────────────────────┐     ┌────────────────────────┐
//!   │  InMemorySessionStore  │     │   RedisSessionStore    │
//!   │  (dev, tests, single   │     │   (production)         │
//!   │   instance)            │     │                        │
//!   └────────────────────────┘     └────────────────────────┘
//! ```
//!
//! The store is selected in `main.rs` by configuration (`REDIS_URL`
//! present or not); everything above the trait is oblivious to the choice.

pub mod manager;
pub mod redis_store;
pub mod store;

pub use manager::SessionManager;
pub use redis_store::RedisSessionStore;
pub use store::{InMemorySessionStore, SessionError, SessionStore};
