//! Session record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The refresh token currently valid for an account.
///
/// There is at most one record per account; saving a new token replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owning account
    pub account_id: i64,
    /// Current refresh token
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
