//! sqlstore - transactional data access over SQL connection pools.
//!
//! This crate sits between application logic and a relational database. It
//! owns the connection pool, runs direct queries, and wraps multi-statement
//! work in transactions that commit on success and roll back on failure,
//! including when the failure is a panic.
//!
//! The same query methods work on a plain store and on the store handed to a
//! transaction callback, so data-access code does not need to know whether it
//! is running transactionally. Nested [`Store::in_tx`] calls join the
//! transaction already in progress instead of starting a new one.
//!
//! PostgreSQL and SQLite are supported through the same API, using `$1`-style
//! placeholders on both.
//!
//! # Example
//!
//! ```no_run
//! use sqlstore::{DbError, SqlParam, Store, StoreConfig};
//!
//! #[derive(sqlx::FromRow)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! # async fn run() -> Result<(), DbError> {
//! let config = StoreConfig::parse("postgres://app@localhost/app?max_connections=20")
//!     .map_err(DbError::config)?;
//! let store = Store::connect_lazy(&config)?;
//!
//! // Direct query on a pooled connection.
//! let user: User = store
//!     .fetch_one("SELECT id, name FROM users WHERE id = $1", &[SqlParam::Int(1)])
//!     .await?;
//! println!("hello, {}", user.name);
//!
//! // Several statements, atomically.
//! store
//!     .in_tx(|tx| async move {
//!         tx.execute(
//!             "UPDATE users SET name = $1 WHERE id = $2",
//!             &[SqlParam::from("robin"), SqlParam::Int(1)],
//!         )
//!         .await?;
//!         tx.execute(
//!             "INSERT INTO audit_log (user_id, action) VALUES ($1, $2)",
//!             &[SqlParam::Int(1), SqlParam::from("rename")],
//!         )
//!         .await?;
//!         Ok(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod params;
pub mod pool;
pub mod store;

pub use config::{DatabaseType, PoolOptions, StoreConfig};
pub use error::{DbError, DbResult};
pub use handle::{DbHandle, DbStatement, DbTransaction};
pub use params::SqlParam;
pub use pool::DbPool;
pub use store::Store;
