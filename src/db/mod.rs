//! Database layer
//!
//! Storage for accounts, friend links and session records. Two backends are
//! supported:
//! - SQLite (default, single file)
//! - MySQL (for larger deployments)
//!
//! The driver is selected by configuration. Repositories talk to the
//! `DatabasePool` trait and pick the matching SQL through [`Backend`].
//!
//! # Usage
//!
//! ```ignore
//! use agora::config::DatabaseConfig;
//! use agora::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, is_unique_violation, Backend, DatabasePool, DynDatabasePool,
    MysqlDatabase, SqliteDatabase,
};
