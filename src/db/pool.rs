//! Connection pools for the SQLite and MySQL backends

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions},
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DatabaseConfig, DatabaseDriver};

/// How long a SQLite writer waits for the file lock before giving up
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A pool repositories can run statements on, whichever backend sits behind it.
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Run a statement that returns no rows
    async fn execute(&self, query: &str) -> Result<u64>;

    async fn ping(&self) -> Result<()>;

    /// Borrow the concrete pool
    fn backend(&self) -> Backend<'_>;

    fn driver(&self) -> DatabaseDriver {
        match self.backend() {
            Backend::Sqlite(_) => DatabaseDriver::Sqlite,
            Backend::Mysql(_) => DatabaseDriver::Mysql,
        }
    }
}

/// Concrete pool borrowed from a [`DatabasePool`], one arm per driver.
#[derive(Clone, Copy)]
pub enum Backend<'a> {
    Sqlite(&'a SqlitePool),
    Mysql(&'a MySqlPool),
}

/// Whether an error chain carries a unique-constraint violation from the store.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .any(|e| match e {
            sqlx::Error::Database(db) => db.is_unique_violation(),
            _ => false,
        })
}

/// Filesystem path behind a SQLite URL; `None` for an in-memory database.
fn sqlite_file(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        None
    } else {
        Some(Path::new(path))
    }
}

/// SQLite pool, file-backed or in-memory
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Open the database at `url`, creating the file and its directory if missing.
    ///
    /// Accepts a bare path, a `sqlite:` URL or `:memory:`.
    pub async fn new(url: &str) -> Result<Self> {
        let options = match sqlite_file(url) {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {:?}", parent)
                    })?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
            }
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .context("Failed to build in-memory SQLite options")?,
        };

        // Set per connection, so every pooled connection enforces friend links
        let options = options.foreign_keys(true).busy_timeout(SQLITE_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(20)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to SQLite database: {}", url))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for SqliteDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    fn backend(&self) -> Backend<'_> {
        Backend::Sqlite(&self.pool)
    }
}

/// MySQL pool
pub struct MysqlDatabase {
    pool: MySqlPool,
}

impl MysqlDatabase {
    /// Connect to `url`; the `mysql://` scheme may be omitted.
    pub async fn new(url: &str) -> Result<Self> {
        let url = if url.starts_with("mysql://") {
            url.to_string()
        } else {
            format!("mysql://{}", url)
        };
        let options =
            MySqlConnectOptions::from_str(&url).context("Invalid MySQL connection URL")?;

        let pool = MySqlPoolOptions::new()
            .max_connections(30)
            .connect_with(options)
            .await
            .context("Failed to connect to MySQL database")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabasePool for MysqlDatabase {
    async fn execute(&self, query: &str) -> Result<u64> {
        let result = sqlx::query(query)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute query: {}", query))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    fn backend(&self) -> Backend<'_> {
        Backend::Mysql(&self.pool)
    }
}

pub type DynDatabasePool = Arc<dyn DatabasePool>;

/// Open the pool selected by `config.driver`
pub async fn create_pool(config: &DatabaseConfig) -> Result<DynDatabasePool> {
    match config.driver {
        DatabaseDriver::Sqlite => Ok(Arc::new(SqliteDatabase::new(&config.url).await?)),
        DatabaseDriver::Mysql => Ok(Arc::new(MysqlDatabase::new(&config.url).await?)),
    }
}

/// Fresh in-memory SQLite pool, private to the caller
pub async fn create_test_pool() -> Result<DynDatabasePool> {
    Ok(Arc::new(SqliteDatabase::new(":memory:").await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_file_from_url() {
        assert_eq!(sqlite_file("data/agora.db"), Some(Path::new("data/agora.db")));
        assert_eq!(sqlite_file("sqlite:data/agora.db"), Some(Path::new("data/agora.db")));
        assert_eq!(
            sqlite_file("sqlite://data/agora.db?mode=rwc"),
            Some(Path::new("data/agora.db"))
        );
        assert_eq!(sqlite_file(":memory:"), None);
        assert_eq!(sqlite_file("sqlite::memory:"), None);
    }

    #[tokio::test]
    async fn test_sqlite_pool_creation() {
        let config = DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: ":memory:".to_string(),
        };

        let pool = create_pool(&config).await.expect("Failed to create pool");
        assert_eq!(pool.driver(), DatabaseDriver::Sqlite);
        assert!(matches!(pool.backend(), Backend::Sqlite(_)));
        pool.ping().await.expect("Ping should succeed");
    }

    #[tokio::test]
    async fn test_sqlite_pool_execute() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        pool.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .expect("Failed to create table");

        let affected = pool
            .execute("INSERT INTO test (name) VALUES ('test')")
            .await
            .expect("Failed to insert");
        assert_eq!(affected, 1);
    }

    #[tokio::test]
    async fn test_in_memory_pools_are_isolated() {
        let first = create_test_pool().await.unwrap();
        let second = create_test_pool().await.unwrap();

        first
            .execute("CREATE TABLE only_here (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        assert!(second.execute("INSERT INTO only_here (id) VALUES (1)").await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_nested_directory_creation() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("nested").join("dir").join("test.db");

        let config = DatabaseConfig {
            driver: DatabaseDriver::Sqlite,
            url: db_path.to_string_lossy().to_string(),
        };

        let pool = create_pool(&config).await.expect("Failed to create pool");
        pool.ping().await.expect("Ping should succeed");
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced_on_every_connection() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = SqliteDatabase::new(&temp_dir.path().join("fk.db").to_string_lossy())
            .await
            .unwrap();
        pool.execute("CREATE TABLE parent (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        pool.execute("CREATE TABLE child (parent_id INTEGER NOT NULL REFERENCES parent(id))")
            .await
            .unwrap();

        let Backend::Sqlite(sqlite) = pool.backend() else {
            panic!("expected a SQLite pool");
        };
        // Hold one connection so the insert below runs on another
        let _held = sqlite.acquire().await.unwrap();
        assert!(pool.execute("INSERT INTO child (parent_id) VALUES (42)").await.is_err());
    }

    #[tokio::test]
    async fn test_unique_violation_detected_through_context() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        pool.execute("CREATE TABLE emails (address TEXT NOT NULL UNIQUE)")
            .await
            .expect("Failed to create table");
        pool.execute("INSERT INTO emails (address) VALUES ('a@x.com')")
            .await
            .expect("Failed to insert");

        let err = pool
            .execute("INSERT INTO emails (address) VALUES ('a@x.com')")
            .await
            .expect_err("Duplicate insert should fail");
        assert!(is_unique_violation(&err));

        let other = pool
            .execute("INSERT INTO missing_table (x) VALUES (1)")
            .await
            .expect_err("Unknown table should fail");
        assert!(!is_unique_violation(&other));
    }

    // Needs a running server; set MYSQL_TEST_URL to point at it
    #[tokio::test]
    #[ignore = "Requires MySQL server"]
    async fn test_mysql_pool_ping() {
        let url = std::env::var("MYSQL_TEST_URL")
            .unwrap_or_else(|_| "mysql://root@localhost/agora_test".to_string());

        let config = DatabaseConfig {
            driver: DatabaseDriver::Mysql,
            url,
        };

        let pool = create_pool(&config).await.expect("Failed to create pool");
        assert_eq!(pool.driver(), DatabaseDriver::Mysql);
        pool.ping().await.expect("Ping should succeed");
    }
}
