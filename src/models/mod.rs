//! Data models
//!
//! Database entities and the public projections built from them:
//! - `Account`, `AccountSummary` and `ProfileChanges`
//! - `SessionRecord`

mod account;
mod session;

pub use account::{Account, AccountSummary, ProfileChanges, DEFAULT_ABOUT_ME};
pub use session::SessionRecord;
