//! Integration tests for transaction semantics: commit, rollback, nesting,
//! and cleanup after failures.

use std::time::{Duration, Instant};

use sqlstore::{DbError, DbHandle, DbResult, SqlParam, Store, StoreConfig};
use tempfile::NamedTempFile;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn memory_store() -> Store {
    init_tracing();
    let config = StoreConfig::parse("sqlite::memory:?acquire_timeout=2").unwrap();
    let store = Store::connect_lazy(&config).unwrap();
    store
        .execute(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL)",
            &[],
        )
        .await
        .expect("Failed to create test table");
    store
}

async fn count_accounts(store: &Store) -> i64 {
    store
        .fetch_scalar("SELECT COUNT(*) FROM accounts", &[])
        .await
        .expect("Failed to count rows")
}

#[tokio::test]
async fn test_commit_persists_changes() {
    let store = memory_store().await;

    let balance = store
        .in_tx(|tx| async move {
            tx.execute(
                "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                &[SqlParam::Int(1), SqlParam::Int(100)],
            )
            .await?;
            tx.execute(
                "UPDATE accounts SET balance = balance + $1 WHERE id = $2",
                &[SqlParam::Int(50), SqlParam::Int(1)],
            )
            .await?;
            tx.fetch_scalar::<i64>(
                "SELECT balance FROM accounts WHERE id = $1",
                &[SqlParam::Int(1)],
            )
            .await
        })
        .await
        .expect("transaction should commit");

    assert_eq!(balance, 150);
    assert_eq!(count_accounts(&store).await, 1);
}

#[tokio::test]
async fn test_callback_error_rolls_back() {
    let store = memory_store().await;

    let result: DbResult<()> = store
        .in_tx(|tx| async move {
            tx.execute(
                "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                &[SqlParam::Int(1), SqlParam::Int(100)],
            )
            .await?;
            Err(DbError::internal("boom"))
        })
        .await;

    let err = result.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("execute transaction"), "unexpected error: {msg}");
    assert!(msg.contains("boom"), "cause should be preserved: {msg}");

    // Nothing from the failed transaction is visible.
    assert_eq!(count_accounts(&store).await, 0);
}

#[tokio::test]
async fn test_sql_failure_rolls_back() {
    let store = memory_store().await;

    let result: DbResult<()> = store
        .in_tx(|tx| async move {
            tx.execute(
                "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                &[SqlParam::Int(1), SqlParam::Int(100)],
            )
            .await?;
            // Primary key violation.
            tx.execute(
                "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                &[SqlParam::Int(1), SqlParam::Int(200)],
            )
            .await?;
            Ok(())
        })
        .await;

    assert!(result.is_err());
    assert_eq!(count_accounts(&store).await, 0);
}

#[tokio::test]
async fn test_nested_call_joins_open_transaction() {
    // The pool holds a single connection, so if the inner call tried to begin
    // its own transaction it would wait the full acquire timeout and fail.
    let store = memory_store().await;
    let start = Instant::now();

    let total = store
        .in_tx(|tx| async move {
            tx.execute(
                "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                &[SqlParam::Int(1), SqlParam::Int(10)],
            )
            .await?;

            let seen_inside = tx
                .in_tx(|inner| async move {
                    assert!(inner.is_in_transaction());
                    inner
                        .execute(
                            "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                            &[SqlParam::Int(2), SqlParam::Int(20)],
                        )
                        .await?;
                    inner
                        .fetch_scalar::<i64>("SELECT COUNT(*) FROM accounts", &[])
                        .await
                })
                .await?;

            // The inner callback saw both uncommitted rows: same transaction.
            assert_eq!(seen_inside, 2);

            tx.fetch_scalar::<i64>("SELECT COUNT(*) FROM accounts", &[])
                .await
        })
        .await
        .expect("nested transaction should commit once");

    assert_eq!(total, 2);
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "inner call must not wait for a second connection"
    );
    assert_eq!(count_accounts(&store).await, 2);
}

#[tokio::test]
async fn test_nested_error_rolls_back_everything() {
    let store = memory_store().await;

    let result: DbResult<()> = store
        .in_tx(|tx| async move {
            tx.execute(
                "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                &[SqlParam::Int(1), SqlParam::Int(10)],
            )
            .await?;
            tx.in_tx(|_inner| async move { Err::<(), _>(DbError::internal("inner boom")) })
                .await
        })
        .await;

    let msg = result.unwrap_err().to_string();
    // Each layer reports the callback failure.
    assert_eq!(msg.matches("execute transaction").count(), 2, "got: {msg}");
    assert!(msg.contains("inner boom"));

    assert_eq!(count_accounts(&store).await, 0);
}

#[tokio::test]
async fn test_transaction_store_expires_after_commit() {
    let store = memory_store().await;

    // Smuggle the transaction-bound store out of the callback.
    let leaked = store
        .in_tx(|tx| async move { Ok(tx) })
        .await
        .expect("transaction should commit");

    assert!(leaked.is_in_transaction());
    match leaked.db() {
        DbHandle::Transaction(tx) => assert!(!tx.is_open().await),
        _ => panic!("expected a transaction-bound store"),
    }

    let err = leaked
        .execute("INSERT INTO accounts (id, balance) VALUES (9, 9)", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::TransactionClosed), "got: {err}");
}

#[tokio::test]
async fn test_begin_failure_is_labeled() {
    let store = memory_store().await;
    store.close().await;

    let err = store
        .in_tx(|_tx| async move { Ok::<(), DbError>(()) })
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("begin transaction"),
        "got: {err}"
    );
}

#[tokio::test]
async fn test_panicking_callback_leaves_store_usable() {
    let store = memory_store().await;

    let task_store = store.clone();
    let handle = tokio::spawn(async move {
        task_store
            .in_tx::<(), _, _>(|tx| async move {
                tx.execute(
                    "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                    &[SqlParam::Int(1), SqlParam::Int(1)],
                )
                .await?;
                panic!("callback blew up");
            })
            .await
    });

    assert!(handle.await.is_err(), "task should have panicked");

    // The connection went back to the pool with the transaction rolled back.
    assert_eq!(count_accounts(&store).await, 0);
}

#[tokio::test]
async fn test_transactions_from_concurrent_tasks() {
    init_tracing();
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc&acquire_timeout=10", temp_file.path().display());
    let config = StoreConfig::parse(&url).unwrap();
    let store = Store::connect_lazy(&config).unwrap();
    store
        .execute(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL)",
            &[],
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..4i64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .in_tx(|tx| async move {
                    tx.execute(
                        "INSERT INTO accounts (id, balance) VALUES ($1, $2)",
                        &[SqlParam::Int(i), SqlParam::Int(i * 10)],
                    )
                    .await?;
                    Ok::<(), DbError>(())
                })
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().expect("each transaction should commit");
    }

    assert_eq!(count_accounts(&store).await, 4);
}
