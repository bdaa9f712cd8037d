//! Account model
//!
//! An account is a registered user of the marketplace. The serialized form is
//! the public view returned by the API: the password hash and the pending
//! activation link never leave the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default profile blurb for new accounts
pub const DEFAULT_ABOUT_ME: &str = "Hello";

/// Registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique identifier
    pub id: i64,
    /// Email address (unique, stored lower-cased)
    pub email: String,
    pub full_name: String,
    /// Password hash (argon2 PHC string)
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub avatar_url: Option<String>,
    pub about_me: String,
    /// Set once the activation link has been followed
    pub is_activated: bool,
    /// Pending activation link, cleared on activation
    #[serde(skip_serializing, default)]
    pub activation_link: Option<String>,
    pub posts_count: i64,
    pub products_count: i64,
    /// Ids of befriended accounts, oldest first
    #[serde(default)]
    pub friends: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new, not yet activated account.
    ///
    /// The password must already be hashed, see `services::password::hash_password`.
    pub fn new(
        email: String,
        full_name: String,
        password_hash: String,
        avatar_url: Option<String>,
        activation_link: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // Will be set by the database
            email,
            full_name,
            password_hash,
            avatar_url,
            about_me: DEFAULT_ABOUT_ME.to_string(),
            is_activated: false,
            activation_link: Some(activation_link),
            posts_count: 0,
            products_count: 0,
            friends: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_friend(&self, friend_id: i64) -> bool {
        self.friends.contains(&friend_id)
    }
}

/// Profile columns to overwrite; `None` keeps the stored value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub about_me: Option<String>,
    /// `Some(None)` removes the avatar
    pub avatar_url: Option<Option<String>>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Short projection used by listings and search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: i64,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            full_name: account.full_name.clone(),
            avatar_url: account.avatar_url.clone(),
        }
    }
}
