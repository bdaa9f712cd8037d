//! User service
//!
//! Profile editing and the public account directory:
//! - update the signed-in account's profile
//! - look up, list and search accounts
//! - friend links between accounts

use crate::db::is_unique_violation;
use crate::db::repositories::AccountRepository;
use crate::models::{Account, AccountSummary, ProfileChanges};
use crate::services::validation::{
    normalize_email, validate_avatar_url, validate_email, validate_full_name,
};
use anyhow::Context;
use std::sync::Arc;

/// Maximum number of accounts returned by a name search
pub const SEARCH_LIMIT: i64 = 50;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Validation error (invalid input)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Account not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another account already uses the email
    #[error("Email already taken: {0}")]
    EmailTaken(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Profile fields to change; `None` leaves a field as it is
#[derive(Debug, Clone, Default)]
pub struct UpdateProfileInput {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub about_me: Option<String>,
    pub avatar_url: Option<String>,
}

/// User service for profiles and the account directory
pub struct UserService {
    accounts: Arc<dyn AccountRepository>,
}

impl UserService {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }

    /// Apply the provided profile fields to the account.
    ///
    /// An empty avatar URL removes the avatar.
    pub async fn update_profile(
        &self,
        account_id: i64,
        input: UpdateProfileInput,
    ) -> Result<Account, UserServiceError> {
        let account = self.get_profile(account_id).await?;
        let mut changes = ProfileChanges::default();

        if let Some(full_name) = input.full_name {
            validate_full_name(&full_name).map_err(UserServiceError::ValidationError)?;
            changes.full_name = Some(full_name.trim().to_string());
        }

        if let Some(about_me) = input.about_me {
            changes.about_me = Some(about_me.trim().to_string());
        }

        if let Some(avatar_url) = input.avatar_url {
            let avatar_url = avatar_url.trim();
            if avatar_url.is_empty() {
                changes.avatar_url = Some(None);
            } else {
                validate_avatar_url(avatar_url).map_err(UserServiceError::ValidationError)?;
                changes.avatar_url = Some(Some(avatar_url.to_string()));
            }
        }

        if let Some(email) = input.email {
            validate_email(&email).map_err(UserServiceError::ValidationError)?;
            let email = normalize_email(&email);
            if email != account.email {
                let holder = self
                    .accounts
                    .get_by_email(&email)
                    .await
                    .context("Failed to check email")?;
                if holder.is_some() {
                    return Err(email_taken(&email));
                }
                changes.email = Some(email);
            }
        }

        if changes.is_empty() {
            return Ok(account);
        }

        match self.accounts.update_profile(account_id, &changes).await {
            Ok(Some(account)) => {
                tracing::info!("Account {} updated its profile", account.id);
                Ok(account)
            }
            Ok(None) => Err(not_found(account_id)),
            Err(e) if is_unique_violation(&e) => {
                Err(email_taken(changes.email.as_deref().unwrap_or(&account.email)))
            }
            Err(e) => Err(e.context("Failed to update profile").into()),
        }
    }

    /// Public profile of an account
    pub async fn get_profile(&self, id: i64) -> Result<Account, UserServiceError> {
        self.accounts
            .get_by_id(id)
            .await
            .context("Failed to load account")?
            .ok_or_else(|| not_found(id))
    }

    /// One page of accounts, newest first, with the total count
    pub async fn list(
        &self,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<AccountSummary>, i64), UserServiceError> {
        let result = self
            .accounts
            .list(page, per_page)
            .await
            .context("Failed to list accounts")?;
        Ok(result)
    }

    /// Accounts whose full name starts with `name`, ignoring case
    pub async fn search_by_name(&self, name: &str) -> Result<Vec<AccountSummary>, UserServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Search name must not be empty".to_string(),
            ));
        }

        let found = self
            .accounts
            .search_by_name(name, SEARCH_LIMIT)
            .await
            .context("Failed to search accounts")?;
        Ok(found)
    }

    /// Befriend another account; returns the caller's updated account
    pub async fn add_friend(
        &self,
        account_id: i64,
        friend_id: i64,
    ) -> Result<Account, UserServiceError> {
        self.check_friend(account_id, friend_id).await?;

        let added = self
            .accounts
            .add_friend(account_id, friend_id)
            .await
            .context("Failed to add friend")?;
        if added {
            tracing::info!("Account {} befriended {}", account_id, friend_id);
        }

        self.get_profile(account_id).await
    }

    /// Drop a friend link; returns the caller's updated account
    pub async fn remove_friend(
        &self,
        account_id: i64,
        friend_id: i64,
    ) -> Result<Account, UserServiceError> {
        self.check_friend(account_id, friend_id).await?;

        let removed = self
            .accounts
            .remove_friend(account_id, friend_id)
            .await
            .context("Failed to remove friend")?;
        if removed {
            tracing::info!("Account {} unfriended {}", account_id, friend_id);
        }

        self.get_profile(account_id).await
    }

    async fn check_friend(&self, account_id: i64, friend_id: i64) -> Result<(), UserServiceError> {
        if account_id == friend_id {
            return Err(UserServiceError::ValidationError(
                "You cannot befriend yourself".to_string(),
            ));
        }
        self.get_profile(friend_id).await?;
        Ok(())
    }
}

fn not_found(id: i64) -> UserServiceError {
    UserServiceError::NotFound(format!("Account {} not found", id))
}

fn email_taken(email: &str) -> UserServiceError {
    UserServiceError::EmailTaken(format!("Email {} is already in use", email))
}
