//! Token service
//!
//! Issues and verifies the two JWTs that make up a session:
//! - a short-lived access token, sent as a bearer token on every request
//! - a long-lived refresh token, kept in an HttpOnly cookie and mirrored in
//!   the session record so it can be revoked
//!
//! Both are HS256 tokens signed with separate secrets, so one can never be
//! accepted in place of the other.

use crate::config::AuthConfig;
use crate::db::repositories::SessionRepository;
use crate::models::{Account, SessionRecord};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Secrets and lifetimes for token minting
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl TokenSettings {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            access_secret: config.access_secret.clone(),
            refresh_secret: config.refresh_secret.clone(),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
        }
    }
}

/// Public account facts carried inside every token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub is_activated: bool,
}

impl From<&Account> for TokenPayload {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            full_name: account.full_name.clone(),
            is_activated: account.is_activated,
        }
    }
}

/// Decoded JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub is_activated: bool,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
    /// Unique per token, so two tokens minted in the same second still differ
    pub jti: String,
}

/// Freshly minted access and refresh tokens
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Token service for minting, verifying and persisting session tokens
pub struct TokenService {
    sessions: Arc<dyn SessionRepository>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(settings: TokenSettings, sessions: Arc<dyn SessionRepository>) -> Self {
        Self {
            sessions,
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
            access_encoding: EncodingKey::from_secret(settings.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(settings.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(settings.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(settings.refresh_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Mint an access/refresh pair for the given account facts
    pub fn generate_tokens(&self, payload: &TokenPayload) -> Result<TokenPair> {
        let access_token = self
            .sign(payload, self.access_ttl, &self.access_encoding)
            .context("Failed to sign access token")?;
        let refresh_token = self
            .sign(payload, self.refresh_ttl, &self.refresh_encoding)
            .context("Failed to sign refresh token")?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Check signature and expiry of an access token
    pub fn verify_access_token(&self, token: &str) -> Option<TokenClaims> {
        self.verify(token, &self.access_decoding, "access")
    }

    /// Check signature and expiry of a refresh token
    pub fn verify_refresh_token(&self, token: &str) -> Option<TokenClaims> {
        self.verify(token, &self.refresh_decoding, "refresh")
    }

    /// Store the refresh token as the account's only session
    pub async fn save_token(&self, account_id: i64, refresh_token: &str) -> Result<SessionRecord> {
        self.sessions.upsert(account_id, refresh_token).await
    }

    /// Replace `current` with `next`, only if `current` is still the stored token
    pub async fn rotate_token(&self, account_id: i64, current: &str, next: &str) -> Result<bool> {
        self.sessions.replace(account_id, current, next).await
    }

    /// Forget the session holding this refresh token
    pub async fn remove_token(&self, refresh_token: &str) -> Result<()> {
        self.sessions.delete_by_token(refresh_token).await
    }

    pub async fn find_token(&self, refresh_token: &str) -> Result<Option<SessionRecord>> {
        self.sessions.find_by_token(refresh_token).await
    }

    fn sign(
        &self,
        payload: &TokenPayload,
        ttl: Duration,
        key: &EncodingKey,
    ) -> jsonwebtoken::errors::Result<String> {
        let now = Utc::now();
        let claims = TokenClaims {
            id: payload.id,
            email: payload.email.clone(),
            full_name: payload.full_name.clone(),
            is_activated: payload.is_activated,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, key)
    }

    fn verify(&self, token: &str, key: &DecodingKey, kind: &str) -> Option<TokenClaims> {
        match decode::<TokenClaims>(token, key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!("Rejected {} token: {}", kind, e);
                None
            }
        }
    }
}
