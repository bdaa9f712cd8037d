//! Account repository
//!
//! Accounts and their friend links. Writes touch only the columns they own,
//! so a password change and an activation running at the same time both stick.

use crate::db::{Backend, DynDatabasePool};
use crate::models::{Account, AccountSummary, ProfileChanges};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create a new account, returning it with its assigned id
    async fn create(&self, account: &Account) -> Result<Account>;

    /// Get account by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Account>>;

    /// Get account by (normalized) email
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Overwrite the given profile columns only; `None` if the account is gone
    async fn update_profile(&self, id: i64, changes: &ProfileChanges) -> Result<Option<Account>>;

    /// Store a new password hash; false if the account is gone
    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool>;

    /// Activate the account holding `link` and spend the link.
    ///
    /// Of several concurrent calls with one link, exactly one gets the account.
    async fn activate_by_link(&self, link: &str) -> Result<Option<Account>>;

    /// List accounts, newest first, with the total count
    async fn list(&self, page: i64, per_page: i64) -> Result<(Vec<AccountSummary>, i64)>;

    /// Case-insensitive prefix match on full name
    async fn search_by_name(&self, prefix: &str, limit: i64) -> Result<Vec<AccountSummary>>;

    /// Link `friend_id` to `account_id`; false if the link already existed
    async fn add_friend(&self, account_id: i64, friend_id: i64) -> Result<bool>;

    /// Remove a friend link; false if there was none
    async fn remove_friend(&self, account_id: i64, friend_id: i64) -> Result<bool>;
}

/// SQLx-based account repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxAccountRepository {
    pool: DynDatabasePool,
}

impl SqlxAccountRepository {
    /// Create a new SQLx account repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AccountRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AccountRepository for SqlxAccountRepository {
    async fn create(&self, account: &Account) -> Result<Account> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => create_account_sqlite(pool, account).await,
            Backend::Mysql(pool) => create_account_mysql(pool, account).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => get_account_by_id_sqlite(pool, id).await,
            Backend::Mysql(pool) => get_account_by_id_mysql(pool, id).await,
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => {
                get_account_where_sqlite(pool, SELECT_ACCOUNT_BY_EMAIL, email).await
            }
            Backend::Mysql(pool) => {
                get_account_where_mysql(pool, SELECT_ACCOUNT_BY_EMAIL, email).await
            }
        }
    }

    async fn update_profile(&self, id: i64, changes: &ProfileChanges) -> Result<Option<Account>> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => update_profile_sqlite(pool, id, changes).await,
            Backend::Mysql(pool) => update_profile_mysql(pool, id, changes).await,
        }
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> Result<bool> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => set_password_hash_sqlite(pool, id, password_hash).await,
            Backend::Mysql(pool) => set_password_hash_mysql(pool, id, password_hash).await,
        }
    }

    async fn activate_by_link(&self, link: &str) -> Result<Option<Account>> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => activate_by_link_sqlite(pool, link).await,
            Backend::Mysql(pool) => activate_by_link_mysql(pool, link).await,
        }
    }

    async fn list(&self, page: i64, per_page: i64) -> Result<(Vec<AccountSummary>, i64)> {
        let per_page = per_page.max(1);
        // Pages past the end come back empty rather than overflowing
        let offset = (page.max(1) - 1).saturating_mul(per_page);
        match self.pool.backend() {
            Backend::Sqlite(pool) => list_accounts_sqlite(pool, per_page, offset).await,
            Backend::Mysql(pool) => list_accounts_mysql(pool, per_page, offset).await,
        }
    }

    async fn search_by_name(&self, prefix: &str, limit: i64) -> Result<Vec<AccountSummary>> {
        let pattern = prefix_pattern(prefix);
        match self.pool.backend() {
            Backend::Sqlite(pool) => search_accounts_sqlite(pool, &pattern, limit).await,
            Backend::Mysql(pool) => search_accounts_mysql(pool, &pattern, limit).await,
        }
    }

    async fn add_friend(&self, account_id: i64, friend_id: i64) -> Result<bool> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => add_friend_sqlite(pool, account_id, friend_id).await,
            Backend::Mysql(pool) => add_friend_mysql(pool, account_id, friend_id).await,
        }
    }

    async fn remove_friend(&self, account_id: i64, friend_id: i64) -> Result<bool> {
        match self.pool.backend() {
            Backend::Sqlite(pool) => remove_friend_sqlite(pool, account_id, friend_id).await,
            Backend::Mysql(pool) => remove_friend_mysql(pool, account_id, friend_id).await,
        }
    }
}

/// Build a `LIKE` pattern matching names that start with `prefix`, ignoring case.
/// `!` escapes the wildcard characters so user input matches literally.
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.trim().to_lowercase().chars() {
        if matches!(c, '!' | '%' | '_') {
            pattern.push('!');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// Statements shared by both dialects

const SELECT_ACCOUNT_BY_ID: &str = r#"
    SELECT id, email, full_name, password_hash, avatar_url, about_me, is_activated,
           activation_link, posts_count, products_count, created_at, updated_at
    FROM accounts
    WHERE id = ?
"#;

const SELECT_ACCOUNT_BY_EMAIL: &str = r#"
    SELECT id, email, full_name, password_hash, avatar_url, about_me, is_activated,
           activation_link, posts_count, products_count, created_at, updated_at
    FROM accounts
    WHERE email = ?
"#;

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO accounts (email, full_name, password_hash, avatar_url, about_me, is_activated,
                          activation_link, posts_count, products_count, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

// A NULL parameter keeps the stored column; the avatar takes a flag so it can be cleared
const UPDATE_PROFILE: &str = r#"
    UPDATE accounts
    SET full_name = COALESCE(?, full_name),
        email = COALESCE(?, email),
        about_me = COALESCE(?, about_me),
        avatar_url = CASE WHEN ? THEN ? ELSE avatar_url END,
        updated_at = ?
    WHERE id = ?
"#;

const UPDATE_PASSWORD_HASH: &str =
    "UPDATE accounts SET password_hash = ?, updated_at = ? WHERE id = ?";

const SELECT_ID_BY_ACTIVATION_LINK: &str = "SELECT id FROM accounts WHERE activation_link = ?";

// Only the caller that still sees the link flips the flag
const ACTIVATE_ACCOUNT: &str = r#"
    UPDATE accounts
    SET is_activated = 1, activation_link = NULL, updated_at = ?
    WHERE id = ? AND activation_link = ?
"#;

const LIST_ACCOUNTS: &str = r#"
    SELECT id, full_name, avatar_url
    FROM accounts
    ORDER BY created_at DESC, id DESC
    LIMIT ? OFFSET ?
"#;

const SEARCH_ACCOUNTS: &str = r#"
    SELECT id, full_name, avatar_url
    FROM accounts
    WHERE LOWER(full_name) LIKE ? ESCAPE '!'
    ORDER BY full_name, id
    LIMIT ?
"#;

const SELECT_FRIEND_IDS: &str = r#"
    SELECT friend_id
    FROM account_friends
    WHERE account_id = ?
    ORDER BY created_at, friend_id
"#;

const DELETE_FRIEND: &str = "DELETE FROM account_friends WHERE account_id = ? AND friend_id = ?";

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_account_sqlite(pool: &SqlitePool, account: &Account) -> Result<Account> {
    let now = Utc::now();

    let result = sqlx::query(INSERT_ACCOUNT)
        .bind(&account.email)
        .bind(&account.full_name)
        .bind(&account.password_hash)
        .bind(&account.avatar_url)
        .bind(&account.about_me)
        .bind(account.is_activated)
        .bind(&account.activation_link)
        .bind(account.posts_count)
        .bind(account.products_count)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create account")?;

    Ok(Account {
        id: result.last_insert_rowid(),
        friends: Vec::new(),
        created_at: now,
        updated_at: now,
        ..account.clone()
    })
}

async fn get_account_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Account>> {
    let row = sqlx::query(SELECT_ACCOUNT_BY_ID)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get account by ID")?;

    match row {
        Some(row) => Ok(Some(load_account_sqlite(pool, &row).await?)),
        None => Ok(None),
    }
}

async fn get_account_where_sqlite(
    pool: &SqlitePool,
    query: &str,
    value: &str,
) -> Result<Option<Account>> {
    let row = sqlx::query(query)
        .bind(value)
        .fetch_optional(pool)
        .await
        .context("Failed to look up account")?;

    match row {
        Some(row) => Ok(Some(load_account_sqlite(pool, &row).await?)),
        None => Ok(None),
    }
}

async fn update_profile_sqlite(
    pool: &SqlitePool,
    id: i64,
    changes: &ProfileChanges,
) -> Result<Option<Account>> {
    sqlx::query(UPDATE_PROFILE)
        .bind(changes.full_name.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.about_me.as_deref())
        .bind(changes.avatar_url.is_some())
        .bind(changes.avatar_url.clone().flatten())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update profile")?;

    get_account_by_id_sqlite(pool, id).await
}

async fn set_password_hash_sqlite(pool: &SqlitePool, id: i64, password_hash: &str) -> Result<bool> {
    let result = sqlx::query(UPDATE_PASSWORD_HASH)
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update password hash")?;

    Ok(result.rows_affected() > 0)
}

async fn activate_by_link_sqlite(pool: &SqlitePool, link: &str) -> Result<Option<Account>> {
    let id: Option<i64> = sqlx::query_scalar(SELECT_ID_BY_ACTIVATION_LINK)
        .bind(link)
        .fetch_optional(pool)
        .await
        .context("Failed to look up activation link")?;
    let Some(id) = id else {
        return Ok(None);
    };

    let result = sqlx::query(ACTIVATE_ACCOUNT)
        .bind(Utc::now())
        .bind(id)
        .bind(link)
        .execute(pool)
        .await
        .context("Failed to activate account")?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }

    get_account_by_id_sqlite(pool, id).await
}

async fn count_accounts_sqlite(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM accounts")
        .fetch_one(pool)
        .await
        .context("Failed to count accounts")?;

    Ok(row.get("count"))
}

async fn list_accounts_sqlite(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<AccountSummary>, i64)> {
    let rows = sqlx::query(LIST_ACCOUNTS)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to list accounts")?;

    let accounts = rows.iter().map(row_to_summary_sqlite).collect();
    let total = count_accounts_sqlite(pool).await?;

    Ok((accounts, total))
}

async fn search_accounts_sqlite(
    pool: &SqlitePool,
    pattern: &str,
    limit: i64,
) -> Result<Vec<AccountSummary>> {
    let rows = sqlx::query(SEARCH_ACCOUNTS)
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to search accounts")?;

    Ok(rows.iter().map(row_to_summary_sqlite).collect())
}

async fn add_friend_sqlite(pool: &SqlitePool, account_id: i64, friend_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO account_friends (account_id, friend_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(account_id)
    .bind(friend_id)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to add friend")?;

    Ok(result.rows_affected() > 0)
}

async fn remove_friend_sqlite(pool: &SqlitePool, account_id: i64, friend_id: i64) -> Result<bool> {
    let result = sqlx::query(DELETE_FRIEND)
        .bind(account_id)
        .bind(friend_id)
        .execute(pool)
        .await
        .context("Failed to remove friend")?;

    Ok(result.rows_affected() > 0)
}

async fn load_account_sqlite(pool: &SqlitePool, row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
    let mut account = row_to_account_sqlite(row);

    let friends = sqlx::query(SELECT_FRIEND_IDS)
        .bind(account.id)
        .fetch_all(pool)
        .await
        .context("Failed to load friends")?;
    account.friends = friends.iter().map(|row| row.get("friend_id")).collect();

    Ok(account)
}

fn row_to_account_sqlite(row: &sqlx::sqlite::SqliteRow) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        password_hash: row.get("password_hash"),
        avatar_url: row.get("avatar_url"),
        about_me: row.get("about_me"),
        is_activated: row.get("is_activated"),
        activation_link: row.get("activation_link"),
        posts_count: row.get("posts_count"),
        products_count: row.get("products_count"),
        friends: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_summary_sqlite(row: &sqlx::sqlite::SqliteRow) -> AccountSummary {
    AccountSummary {
        id: row.get("id"),
        full_name: row.get("full_name"),
        avatar_url: row.get("avatar_url"),
    }
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_account_mysql(pool: &MySqlPool, account: &Account) -> Result<Account> {
    let now = Utc::now();

    let result = sqlx::query(INSERT_ACCOUNT)
        .bind(&account.email)
        .bind(&account.full_name)
        .bind(&account.password_hash)
        .bind(&account.avatar_url)
        .bind(&account.about_me)
        .bind(account.is_activated)
        .bind(&account.activation_link)
        .bind(account.posts_count)
        .bind(account.products_count)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create account")?;

    Ok(Account {
        id: result.last_insert_id() as i64,
        friends: Vec::new(),
        created_at: now,
        updated_at: now,
        ..account.clone()
    })
}

async fn get_account_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Account>> {
    let row = sqlx::query(SELECT_ACCOUNT_BY_ID)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get account by ID")?;

    match row {
        Some(row) => Ok(Some(load_account_mysql(pool, &row).await?)),
        None => Ok(None),
    }
}

async fn get_account_where_mysql(
    pool: &MySqlPool,
    query: &str,
    value: &str,
) -> Result<Option<Account>> {
    let row = sqlx::query(query)
        .bind(value)
        .fetch_optional(pool)
        .await
        .context("Failed to look up account")?;

    match row {
        Some(row) => Ok(Some(load_account_mysql(pool, &row).await?)),
        None => Ok(None),
    }
}

async fn update_profile_mysql(
    pool: &MySqlPool,
    id: i64,
    changes: &ProfileChanges,
) -> Result<Option<Account>> {
    sqlx::query(UPDATE_PROFILE)
        .bind(changes.full_name.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.about_me.as_deref())
        .bind(changes.avatar_url.is_some())
        .bind(changes.avatar_url.clone().flatten())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update profile")?;

    get_account_by_id_mysql(pool, id).await
}

async fn set_password_hash_mysql(pool: &MySqlPool, id: i64, password_hash: &str) -> Result<bool> {
    let result = sqlx::query(UPDATE_PASSWORD_HASH)
        .bind(password_hash)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update password hash")?;

    Ok(result.rows_affected() > 0)
}

async fn activate_by_link_mysql(pool: &MySqlPool, link: &str) -> Result<Option<Account>> {
    let id: Option<i64> = sqlx::query_scalar(SELECT_ID_BY_ACTIVATION_LINK)
        .bind(link)
        .fetch_optional(pool)
        .await
        .context("Failed to look up activation link")?;
    let Some(id) = id else {
        return Ok(None);
    };

    let result = sqlx::query(ACTIVATE_ACCOUNT)
        .bind(Utc::now())
        .bind(id)
        .bind(link)
        .execute(pool)
        .await
        .context("Failed to activate account")?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }

    get_account_by_id_mysql(pool, id).await
}

async fn count_accounts_mysql(pool: &MySqlPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as count FROM accounts")
        .fetch_one(pool)
        .await
        .context("Failed to count accounts")?;

    Ok(row.get("count"))
}

async fn list_accounts_mysql(
    pool: &MySqlPool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<AccountSummary>, i64)> {
    let rows = sqlx::query(LIST_ACCOUNTS)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to list accounts")?;

    let accounts = rows.iter().map(row_to_summary_mysql).collect();
    let total = count_accounts_mysql(pool).await?;

    Ok((accounts, total))
}

async fn search_accounts_mysql(
    pool: &MySqlPool,
    pattern: &str,
    limit: i64,
) -> Result<Vec<AccountSummary>> {
    let rows = sqlx::query(SEARCH_ACCOUNTS)
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to search accounts")?;

    Ok(rows.iter().map(row_to_summary_mysql).collect())
}

async fn add_friend_mysql(pool: &MySqlPool, account_id: i64, friend_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "INSERT IGNORE INTO account_friends (account_id, friend_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(account_id)
    .bind(friend_id)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to add friend")?;

    Ok(result.rows_affected() > 0)
}

async fn remove_friend_mysql(pool: &MySqlPool, account_id: i64, friend_id: i64) -> Result<bool> {
    let result = sqlx::query(DELETE_FRIEND)
        .bind(account_id)
        .bind(friend_id)
        .execute(pool)
        .await
        .context("Failed to remove friend")?;

    Ok(result.rows_affected() > 0)
}

async fn load_account_mysql(pool: &MySqlPool, row: &sqlx::mysql::MySqlRow) -> Result<Account> {
    let mut account = row_to_account_mysql(row);

    let friends = sqlx::query(SELECT_FRIEND_IDS)
        .bind(account.id)
        .fetch_all(pool)
        .await
        .context("Failed to load friends")?;
    account.friends = friends.iter().map(|row| row.get("friend_id")).collect();

    Ok(account)
}

fn row_to_account_mysql(row: &sqlx::mysql::MySqlRow) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        password_hash: row.get("password_hash"),
        avatar_url: row.get("avatar_url"),
        about_me: row.get("about_me"),
        is_activated: row.get("is_activated"),
        activation_link: row.get("activation_link"),
        posts_count: row.get("posts_count"),
        products_count: row.get("products_count"),
        friends: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_summary_mysql(row: &sqlx::mysql::MySqlRow) -> AccountSummary {
    AccountSummary {
        id: row.get("id"),
        full_name: row.get("full_name"),
        avatar_url: row.get("avatar_url"),
    }
}
