//! Transaction Tests
//!
//! Context-scoped transactions over a pooled SQLite data source: commit and
//! rollback visibility, connection reuse inside a transaction, and the
//! restoration of autocommit and isolation level afterwards.

use anyhow::Result;
use pretty_assertions::assert_eq;
use rstest::rstest;
use sluice_connection::{DataSource, PoolConfig, TransactionManager};
use sluice_core::{IsolationLevel, SluiceError, Value};

use crate::fixtures::{TestDatabase, account_count, balance_of, database};

/// Committed work is visible to other contexts only after commit
#[rstest]
fn test_transaction_commit(database: TestDatabase) -> Result<()> {
    let ds = database.data_source(PoolConfig::new(2));
    let manager = TransactionManager::new();
    let writer = manager.context();
    let reader = manager.context();

    writer.begin(IsolationLevel::Default);
    let conn = ds.get_connection(&writer)?;
    conn.execute(
        "INSERT INTO accounts (owner, balance) VALUES ('carol', 10)",
        &[],
    )?;
    assert_eq!(account_count(&conn)?, 3, "insert visible inside the transaction");

    {
        let other = ds.get_connection(&reader)?;
        assert!(!other.same_connection(&conn));
        assert_eq!(account_count(&other)?, 2, "insert invisible before commit");
    }

    writer.commit()?;

    let other = ds.get_connection(&reader)?;
    assert_eq!(account_count(&other)?, 3, "insert persists after commit");
    Ok(())
}

/// Rolled back work disappears
#[rstest]
fn test_transaction_rollback(database: TestDatabase) -> Result<()> {
    let ds = database.data_source(PoolConfig::new(1));
    let ctx = TransactionManager::new().context();

    ctx.begin(IsolationLevel::Default);
    let conn = ds.get_connection(&ctx)?;
    conn.execute("DELETE FROM accounts", &[])?;
    assert_eq!(account_count(&conn)?, 0);
    ctx.rollback()?;

    let conn = ds.get_connection(&ctx)?;
    assert_eq!(account_count(&conn)?, 2);
    Ok(())
}

/// A transfer through the closure helper is all-or-nothing
#[rstest]
fn test_transaction_helper_is_atomic(database: TestDatabase) -> Result<()> {
    let ds = database.data_source(PoolConfig::new(1));
    let ctx = TransactionManager::new().context();

    let transfer = |amount: i64| -> Result<()> {
        ctx.transaction(IsolationLevel::Serializable, |ctx| {
            let conn = ds.get_connection(ctx)?;
            conn.execute(
                "UPDATE accounts SET balance = balance - ? WHERE owner = 'alice'",
                &[Value::Int64(amount)],
            )?;
            if balance_of(&conn, "alice")? < 0 {
                anyhow::bail!("insufficient funds");
            }
            conn.execute(
                "UPDATE accounts SET balance = balance + ? WHERE owner = 'bob'",
                &[Value::Int64(amount)],
            )?;
            Ok(())
        })
    };

    transfer(30)?;
    let err = transfer(500).unwrap_err();
    assert_eq!(err.to_string(), "insufficient funds");

    let conn = ds.get_connection(&ctx)?;
    assert_eq!(balance_of(&conn, "alice")?, 70);
    assert_eq!(balance_of(&conn, "bob")?, 80);
    Ok(())
}

/// Every request inside one transaction gets the same connection
#[rstest]
fn test_transaction_reuses_bound_connection(database: TestDatabase) -> Result<()> {
    let ds = database.data_source(PoolConfig::new(3));
    let ctx = TransactionManager::new().context();

    ctx.begin(IsolationLevel::Default);
    let first = ds.get_connection(&ctx)?;
    let second = ds.get_connection(&ctx)?;
    assert!(first.same_connection(&second));
    assert_eq!(ds.stats().active(), 1);

    ctx.commit()?;
    let err = ctx.commit().unwrap_err();
    assert!(err.is_transaction_state());
    assert_eq!(ds.stats().active(), 0);
    Ok(())
}

/// Isolation and autocommit are put back once the transaction ends
#[rstest]
#[case::commit(true)]
#[case::rollback(false)]
fn test_transaction_restores_connection_state(
    database: TestDatabase,
    #[case] commit: bool,
) -> Result<()> {
    let ds = database.data_source(PoolConfig::new(1));
    let ctx = TransactionManager::new().context();

    let before = ds.get_connection(&ctx)?;
    let original_isolation = before.isolation_level()?;
    assert_eq!(original_isolation, IsolationLevel::Serializable);
    assert!(before.auto_commit()?);
    before.close();

    ctx.begin(IsolationLevel::ReadUncommitted);
    let conn = ds.get_connection(&ctx)?;
    assert_eq!(conn.isolation_level()?, IsolationLevel::ReadUncommitted);
    assert!(!conn.auto_commit()?);
    if commit {
        ctx.commit()?;
    } else {
        ctx.rollback()?;
    }

    let after = ds.get_connection(&ctx)?;
    assert!(after.same_connection(&conn), "capacity 1 hands back the same connection");
    assert_eq!(after.isolation_level()?, original_isolation);
    assert!(after.auto_commit()?);
    Ok(())
}

/// An isolation level SQLite cannot provide fails the request, not the pool
#[rstest]
fn test_unsupported_isolation_level(database: TestDatabase) -> Result<()> {
    let ds = database.data_source(PoolConfig::new(1));
    let ctx = TransactionManager::new().context();

    ctx.begin(IsolationLevel::RepeatableRead);
    let err = ds.get_connection(&ctx).unwrap_err();
    assert!(matches!(err, SluiceError::NotSupported(_)));
    ctx.rollback()?;

    let conn = ds.get_connection(&ctx)?;
    assert_eq!(account_count(&conn)?, 2);
    Ok(())
}

/// A transaction bound to one data source refuses a second one
#[rstest]
fn test_second_data_source_is_refused(database: TestDatabase) -> Result<()> {
    let orders = database.data_source(PoolConfig::new(1));
    let audit = database.data_source(PoolConfig::new(1));
    let ctx = TransactionManager::new().context();

    ctx.begin(IsolationLevel::Default);
    let conn = orders.get_connection(&ctx)?;
    conn.execute("UPDATE accounts SET balance = 0", &[])?;

    let err = audit.get_connection(&ctx).unwrap_err();
    assert!(err.is_transaction_state());
    ctx.rollback()?;

    let conn = audit.get_connection(&ctx)?;
    assert_eq!(balance_of(&conn, "alice")?, 100);
    Ok(())
}
