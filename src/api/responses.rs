//! Shared API response types
//!
//! Response bodies used by more than one endpoint. Field names are camelCase
//! on the wire.

use serde::{Deserialize, Serialize};

use crate::models::{Account, AccountSummary};

/// Body returned by register, login and refresh
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: Account,
    pub access_token: String,
}

/// Body returned after a password change
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangedResponse {
    pub message: String,
    pub access_token: String,
}

/// One page of the account directory
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPageResponse {
    pub users: Vec<AccountSummary>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
