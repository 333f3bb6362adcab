//! Database module for the UpSkill auth service
//!
//! User records, the credential store abstraction and its Postgres and
//! in-memory implementations.

pub mod models;
pub mod operations;
pub mod store;

pub use models::{normalize_email, RefreshTokenRecord, Role, User};
pub use operations::{DbOperations, DbPoolStatus};
pub use store::{InMemoryUserStore, UserStore};
