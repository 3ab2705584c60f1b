//! # Domain Layer
//!
//! Core business entities for the authentication service. This layer is
//! framework-agnostic and represents the heart of the identity model.
//!
//! ## Module Structure
//!
//! | Module     | Purpose                                          |
//! |------------|--------------------------------------------------|
//! | `entities` | Users, sessions, subjects, provider identities   |
//!
//! ## Design Decisions
//!
//! 1. **Entities vs DTOs**: domain entities carry all persistent fields;
//!    the API layer has separate DTOs for request/response transformation.
//!
//! 2. **Tagged subjects**: anonymous holders are addressed by session id,
//!    registered users by user id. [`entities::SubjectId`] keeps the two
//!    spaces apart in the type system.
//!
//! 3. **`FromRow` derive**: the `User` entity maps straight from sqlx rows;
//!    session records are store-native (in-memory map or Redis hash), not
//!    SQL rows.

pub mod entities;

pub use entities::*;
