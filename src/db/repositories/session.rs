//! Session repository
//!
//! One row per account holding its currently valid refresh token.
//! Rotation is a conditional update, so a token is spent at most once.

use crate::db::{Backend, DynDatabasePool};
use crate::models::SessionRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store `refresh_token` as the account's session, replacing any previous one
    async fn upsert(&self, account_id: i64, refresh_token: &str) -> Result<SessionRecord>;

    /// Swap the stored token only if it still equals `current`.
    ///
    /// Returns false when the record is missing or holds another token.
    async fn replace(&self, account_id: i64, current: &str, next: &str) -> Result<bool>;

    /// Find the record holding this refresh token
    async fn find_by_token(&self, refresh_token: &str) -> Result<Option<SessionRecord>>;

    /// Find the record of an account
    async fn find_by_account(&self, account_id: i64) -> Result<Option<SessionRecord>>;

    /// Delete the record holding this refresh token; no-op when none does
    async fn delete_by_token(&self, refresh_token: &str) -> Result<()>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn upsert(&self, account_id: i64, refresh_token: &str) -> Result<SessionRecord> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => upsert_session_sqlite(pool, account_id, refresh_token).await,
            Backend::Mysql(pool) => upsert_session_mysql(pool, account_id, refresh_token).await,
        }
    }

    async fn replace(&self, account_id: i64, current: &str, next: &str) -> Result<bool> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => replace_session_sqlite(pool, account_id, current, next).await,
            Backend::Mysql(pool) => replace_session_mysql(pool, account_id, current, next).await,
        }
    }

    async fn find_by_token(&self, refresh_token: &str) -> Result<Option<SessionRecord>> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => find_session_by_token_sqlite(pool, refresh_token).await,
            Backend::Mysql(pool) => find_session_by_token_mysql(pool, refresh_token).await,
        }
    }

    async fn find_by_account(&self, account_id: i64) -> Result<Option<SessionRecord>> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => find_session_by_account_sqlite(pool, account_id).await,
            Backend::Mysql(pool) => find_session_by_account_mysql(pool, account_id).await,
        }
    }

    async fn delete_by_token(&self, refresh_token: &str) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => delete_session_by_token_sqlite(pool, refresh_token).await,
            Backend::Mysql(pool) => delete_session_by_token_mysql(pool, refresh_token).await,
        }
    }
}

const REPLACE_SESSION: &str = r#"
    UPDATE sessions
    SET refresh_token = ?, updated_at = ?
    WHERE account_id = ? AND refresh_token = ?
"#;

const SELECT_SESSION_BY_TOKEN: &str = r#"
    SELECT account_id, refresh_token, created_at, updated_at
    FROM sessions
    WHERE refresh_token = ?
"#;

const SELECT_SESSION_BY_ACCOUNT: &str = r#"
    SELECT account_id, refresh_token, created_at, updated_at
    FROM sessions
    WHERE account_id = ?
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn upsert_session_sqlite(
    pool: &SqlitePool,
    account_id: i64,
    refresh_token: &str,
) -> Result<SessionRecord> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO sessions (account_id, refresh_token, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(account_id) DO UPDATE SET
            refresh_token = excluded.refresh_token,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(account_id)
    .bind(refresh_token)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to save session")?;

    find_session_by_account_sqlite(pool, account_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Session not found after save"))
}

async fn replace_session_sqlite(
    pool: &SqlitePool,
    account_id: i64,
    current: &str,
    next: &str,
) -> Result<bool> {
    let result = sqlx::query(REPLACE_SESSION)
        .bind(next)
        .bind(Utc::now())
        .bind(account_id)
        .bind(current)
        .execute(pool)
        .await
        .context("Failed to rotate session")?;

    Ok(result.rows_affected() == 1)
}

async fn find_session_by_token_sqlite(
    pool: &SqlitePool,
    refresh_token: &str,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(SELECT_SESSION_BY_TOKEN)
        .bind(refresh_token)
        .fetch_optional(pool)
        .await
        .context("Failed to find session by token")?;

    Ok(row.as_ref().map(row_to_session_sqlite))
}

async fn find_session_by_account_sqlite(
    pool: &SqlitePool,
    account_id: i64,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(SELECT_SESSION_BY_ACCOUNT)
        .bind(account_id)
        .fetch_optional(pool)
        .await
        .context("Failed to find session by account")?;

    Ok(row.as_ref().map(row_to_session_sqlite))
}

async fn delete_session_by_token_sqlite(pool: &SqlitePool, refresh_token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE refresh_token = ?")
        .bind(refresh_token)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> SessionRecord {
    SessionRecord {
        account_id: row.get("account_id"),
        refresh_token: row.get("refresh_token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn upsert_session_mysql(
    pool: &MySqlPool,
    account_id: i64,
    refresh_token: &str,
) -> Result<SessionRecord> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO sessions (account_id, refresh_token, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            refresh_token = VALUES(refresh_token),
            updated_at = VALUES(updated_at)
        "#,
    )
    .bind(account_id)
    .bind(refresh_token)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("Failed to save session")?;

    find_session_by_account_mysql(pool, account_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Session not found after save"))
}

async fn replace_session_mysql(
    pool: &MySqlPool,
    account_id: i64,
    current: &str,
    next: &str,
) -> Result<bool> {
    let result = sqlx::query(REPLACE_SESSION)
        .bind(next)
        .bind(Utc::now())
        .bind(account_id)
        .bind(current)
        .execute(pool)
        .await
        .context("Failed to rotate session")?;

    Ok(result.rows_affected() == 1)
}

async fn find_session_by_token_mysql(
    pool: &MySqlPool,
    refresh_token: &str,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(SELECT_SESSION_BY_TOKEN)
        .bind(refresh_token)
        .fetch_optional(pool)
        .await
        .context("Failed to find session by token")?;

    Ok(row.as_ref().map(row_to_session_mysql))
}

async fn find_session_by_account_mysql(
    pool: &MySqlPool,
    account_id: i64,
) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(SELECT_SESSION_BY_ACCOUNT)
        .bind(account_id)
        .fetch_optional(pool)
        .await
        .context("Failed to find session by account")?;

    Ok(row.as_ref().map(row_to_session_mysql))
}

async fn delete_session_by_token_mysql(pool: &MySqlPool, refresh_token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE refresh_token = ?")
        .bind(refresh_token)
        .execute(pool)
        .await
        .context("Failed to delete session")?;

    Ok(())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> SessionRecord {
    SessionRecord {
        account_id: row.get("account_id"),
        refresh_token: row.get("refresh_token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
