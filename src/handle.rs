//! Query execution over pools and transactions.
//!
//! [`DbHandle`] is the capability every query runs through. It is either a
//! whole pool (each statement grabs its own connection) or one open
//! transaction (every statement rides the same connection). Callers cannot
//! tell the difference, which is what lets the same query code run inside
//! and outside a transaction.

use std::sync::Arc;

use sqlx::postgres::{PgRow, PgStatement};
use sqlx::sqlite::{SqliteRow, SqliteStatement};
use sqlx::{FromRow, Postgres, Sqlite, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::DatabaseType;
use crate::error::{DbError, DbResult};
use crate::params::SqlParam;
use crate::pool::DbPool;

type PgTx = Transaction<'static, Postgres>;
type SqliteTx = Transaction<'static, Sqlite>;

/// Where a statement executes: a pool or one open transaction.
#[derive(Clone)]
pub enum DbHandle {
    Pool(DbPool),
    Transaction(DbTransaction),
}

/// A shareable reference to one open transaction.
///
/// The transaction itself lives in a slot shared by all clones. Committing or
/// rolling back takes it out of the slot; afterwards every clone sees the
/// transaction as closed and queries through it fail with
/// [`DbError::TransactionClosed`]. Statements on the same transaction are
/// serialized by the slot lock, matching the single connection underneath.
///
/// If the slot is dropped with the transaction still inside, the connection
/// rolls back on its way back to the pool.
#[derive(Clone)]
pub struct DbTransaction {
    slot: TxSlot,
}

#[derive(Clone)]
enum TxSlot {
    Postgres(Arc<Mutex<Option<PgTx>>>),
    Sqlite(Arc<Mutex<Option<SqliteTx>>>),
}

impl DbTransaction {
    pub(crate) fn postgres(tx: PgTx) -> Self {
        Self {
            slot: TxSlot::Postgres(Arc::new(Mutex::new(Some(tx)))),
        }
    }

    pub(crate) fn sqlite(tx: SqliteTx) -> Self {
        Self {
            slot: TxSlot::Sqlite(Arc::new(Mutex::new(Some(tx)))),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        match &self.slot {
            TxSlot::Postgres(_) => DatabaseType::Postgres,
            TxSlot::Sqlite(_) => DatabaseType::Sqlite,
        }
    }

    /// Whether the transaction has not yet been committed or rolled back.
    pub async fn is_open(&self) -> bool {
        match &self.slot {
            TxSlot::Postgres(slot) => slot.lock().await.is_some(),
            TxSlot::Sqlite(slot) => slot.lock().await.is_some(),
        }
    }

    /// Commit the transaction, closing the slot for every clone.
    pub(crate) async fn commit(&self) -> DbResult<()> {
        match &self.slot {
            TxSlot::Postgres(slot) => {
                let tx = slot.lock().await.take().ok_or(DbError::TransactionClosed)?;
                tx.commit().await.map_err(DbError::commit)
            }
            TxSlot::Sqlite(slot) => {
                let tx = slot.lock().await.take().ok_or(DbError::TransactionClosed)?;
                tx.commit().await.map_err(DbError::commit)
            }
        }
    }

    /// Roll back if the transaction is still open.
    ///
    /// Returns `None` when the slot was already empty (committed or rolled
    /// back earlier), which callers treat as success.
    pub(crate) async fn rollback_if_open(&self) -> Option<Result<(), sqlx::Error>> {
        match &self.slot {
            TxSlot::Postgres(slot) => {
                let tx = slot.lock().await.take()?;
                Some(tx.rollback().await)
            }
            TxSlot::Sqlite(slot) => {
                let tx = slot.lock().await.take()?;
                Some(tx.rollback().await)
            }
        }
    }
}

/// A prepared statement with its result-shape metadata.
pub enum DbStatement<'q> {
    Postgres(PgStatement<'q>),
    Sqlite(SqliteStatement<'q>),
}

impl<'q> DbStatement<'q> {
    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        use sqlx::Statement as _;
        match self {
            Self::Postgres(s) => s.sql(),
            Self::Sqlite(s) => s.sql(),
        }
    }

    /// Names of the columns the statement will produce, in order.
    pub fn column_names(&self) -> Vec<&str> {
        use sqlx::{Column as _, Statement as _};
        match self {
            Self::Postgres(s) => s.columns().iter().map(|c| c.name()).collect(),
            Self::Sqlite(s) => s.columns().iter().map(|c| c.name()).collect(),
        }
    }
}

impl DbHandle {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            Self::Pool(pool) => pool.db_type(),
            Self::Transaction(tx) => tx.db_type(),
        }
    }

    /// Execute a statement and return the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        debug!(sql = %sql, params = params.len(), "Executing statement");
        match self {
            Self::Pool(DbPool::Postgres(pool)) => postgres::execute(pool, sql, params).await,
            Self::Pool(DbPool::Sqlite(pool)) => sqlite::execute(pool, sql, params).await,
            Self::Transaction(tx) => match &tx.slot {
                TxSlot::Postgres(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    postgres::execute(&mut **tx, sql, params).await
                }
                TxSlot::Sqlite(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    sqlite::execute(&mut **tx, sql, params).await
                }
            },
        }
    }

    /// Fetch exactly one row decoded into `T`.
    ///
    /// Zero rows surface as a [`DbError::Database`] error, more than one row
    /// is a driver error as well.
    pub async fn fetch_one<T>(&self, sql: &str, params: &[SqlParam]) -> DbResult<T>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow> + for<'r> FromRow<'r, SqliteRow>,
    {
        debug!(sql = %sql, params = params.len(), "Fetching one row");
        match self {
            Self::Pool(DbPool::Postgres(pool)) => postgres::fetch_one(pool, sql, params).await,
            Self::Pool(DbPool::Sqlite(pool)) => sqlite::fetch_one(pool, sql, params).await,
            Self::Transaction(tx) => match &tx.slot {
                TxSlot::Postgres(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    postgres::fetch_one(&mut **tx, sql, params).await
                }
                TxSlot::Sqlite(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    sqlite::fetch_one(&mut **tx, sql, params).await
                }
            },
        }
    }

    /// Fetch at most one row decoded into `T`.
    pub async fn fetch_optional<T>(&self, sql: &str, params: &[SqlParam]) -> DbResult<Option<T>>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow> + for<'r> FromRow<'r, SqliteRow>,
    {
        debug!(sql = %sql, params = params.len(), "Fetching optional row");
        match self {
            Self::Pool(DbPool::Postgres(pool)) => postgres::fetch_optional(pool, sql, params).await,
            Self::Pool(DbPool::Sqlite(pool)) => sqlite::fetch_optional(pool, sql, params).await,
            Self::Transaction(tx) => match &tx.slot {
                TxSlot::Postgres(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    postgres::fetch_optional(&mut **tx, sql, params).await
                }
                TxSlot::Sqlite(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    sqlite::fetch_optional(&mut **tx, sql, params).await
                }
            },
        }
    }

    /// Fetch all result rows decoded into `T`.
    pub async fn fetch_all<T>(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<T>>
    where
        T: Send + Unpin + for<'r> FromRow<'r, PgRow> + for<'r> FromRow<'r, SqliteRow>,
    {
        debug!(sql = %sql, params = params.len(), "Fetching rows");
        match self {
            Self::Pool(DbPool::Postgres(pool)) => postgres::fetch_all(pool, sql, params).await,
            Self::Pool(DbPool::Sqlite(pool)) => sqlite::fetch_all(pool, sql, params).await,
            Self::Transaction(tx) => match &tx.slot {
                TxSlot::Postgres(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    postgres::fetch_all(&mut **tx, sql, params).await
                }
                TxSlot::Sqlite(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    sqlite::fetch_all(&mut **tx, sql, params).await
                }
            },
        }
    }

    /// Fetch a single value from a single-column, single-row result.
    pub async fn fetch_scalar<T>(&self, sql: &str, params: &[SqlParam]) -> DbResult<T>
    where
        (T,): Send + Unpin + for<'r> FromRow<'r, PgRow> + for<'r> FromRow<'r, SqliteRow>,
    {
        let (value,) = self.fetch_one::<(T,)>(sql, params).await?;
        Ok(value)
    }

    /// Prepare a statement and return its metadata.
    pub async fn prepare<'q>(&self, sql: &'q str) -> DbResult<DbStatement<'q>> {
        debug!(sql = %sql, "Preparing statement");
        match self {
            Self::Pool(DbPool::Postgres(pool)) => {
                Ok(DbStatement::Postgres(postgres::prepare(pool, sql).await?))
            }
            Self::Pool(DbPool::Sqlite(pool)) => {
                Ok(DbStatement::Sqlite(sqlite::prepare(pool, sql).await?))
            }
            Self::Transaction(tx) => match &tx.slot {
                TxSlot::Postgres(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    Ok(DbStatement::Postgres(
                        postgres::prepare(&mut **tx, sql).await?,
                    ))
                }
                TxSlot::Sqlite(slot) => {
                    let mut guard = slot.lock().await;
                    let tx = guard.as_mut().ok_or(DbError::TransactionClosed)?;
                    Ok(DbStatement::Sqlite(sqlite::prepare(&mut **tx, sql).await?))
                }
            },
        }
    }
}

mod postgres {
    use futures_util::TryStreamExt;
    use sqlx::postgres::{PgRow, PgStatement};
    use sqlx::{Executor, FromRow, Postgres};

    use crate::error::DbResult;
    use crate::params::{self, SqlParam};

    pub(super) async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<u64>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let args = params::postgres_arguments(params)?;
        let result = sqlx::query_with(sql, args).execute(executor).await?;
        Ok(result.rows_affected())
    }

    pub(super) async fn fetch_one<'c, E, T>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<T>
    where
        E: Executor<'c, Database = Postgres>,
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        let args = params::postgres_arguments(params)?;
        Ok(sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch_one(executor)
            .await?)
    }

    pub(super) async fn fetch_optional<'c, E, T>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<Option<T>>
    where
        E: Executor<'c, Database = Postgres>,
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        let args = params::postgres_arguments(params)?;
        Ok(sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch_optional(executor)
            .await?)
    }

    pub(super) async fn fetch_all<'c, E, T>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<Vec<T>>
    where
        E: Executor<'c, Database = Postgres>,
        T: Send + Unpin + for<'r> FromRow<'r, PgRow>,
    {
        let args = params::postgres_arguments(params)?;
        Ok(sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch(executor)
            .try_collect()
            .await?)
    }

    pub(super) async fn prepare<'c, 'q, E>(executor: E, sql: &'q str) -> DbResult<PgStatement<'q>>
    where
        E: Executor<'c, Database = Postgres>,
    {
        Ok(executor.prepare(sql).await?)
    }
}

mod sqlite {
    use futures_util::TryStreamExt;
    use sqlx::sqlite::{SqliteRow, SqliteStatement};
    use sqlx::{Executor, FromRow, Sqlite};

    use crate::error::DbResult;
    use crate::params::{self, SqlParam};

    pub(super) async fn execute<'c, E>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<u64>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let args = params::sqlite_arguments(params)?;
        let result = sqlx::query_with(sql, args).execute(executor).await?;
        Ok(result.rows_affected())
    }

    pub(super) async fn fetch_one<'c, E, T>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<T>
    where
        E: Executor<'c, Database = Sqlite>,
        T: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
    {
        let args = params::sqlite_arguments(params)?;
        Ok(sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch_one(executor)
            .await?)
    }

    pub(super) async fn fetch_optional<'c, E, T>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<Option<T>>
    where
        E: Executor<'c, Database = Sqlite>,
        T: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
    {
        let args = params::sqlite_arguments(params)?;
        Ok(sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch_optional(executor)
            .await?)
    }

    pub(super) async fn fetch_all<'c, E, T>(
        executor: E,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<Vec<T>>
    where
        E: Executor<'c, Database = Sqlite>,
        T: Send + Unpin + for<'r> FromRow<'r, SqliteRow>,
    {
        let args = params::sqlite_arguments(params)?;
        Ok(sqlx::query_as_with::<_, T, _>(sql, args)
            .fetch(executor)
            .try_collect()
            .await?)
    }

    pub(super) async fn prepare<'c, 'q, E>(
        executor: E,
        sql: &'q str,
    ) -> DbResult<SqliteStatement<'q>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        Ok(executor.prepare(sql).await?)
    }
}
