//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the operations for one record type.

pub mod account;
pub mod session;

pub use account::{AccountRepository, SqlxAccountRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
