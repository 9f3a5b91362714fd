//! Shared fixtures for the end-to-end tests
//!
//! Each [`TestDatabase`] is a fresh SQLite file seeded with a small
//! `accounts` table, living in its own temporary directory that is removed
//! when the fixture is dropped.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rstest::rstest;
//! use sluice_driver_tests::fixtures::{TestDatabase, database};
//!
//! #[rstest]
//! fn test_something(database: TestDatabase) -> anyhow::Result<()> {
//!     let ds = database.data_source(PoolConfig::new(2));
//!     // test code...
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use rstest::fixture;
use sluice_connection::{Connection, DriverDataSource, PoolConfig};
use sluice_core::{ConnectionProperties, DriverRegistry, RawConnection};
use sluice_driver_sqlite::{SqliteConnection, SqliteDriver, SqliteOptions};
use tempfile::TempDir;

static LOGGING: Lazy<()> = Lazy::new(|| {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sluice=info"));
    // Another test harness may already have installed a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install the test log subscriber once per process
pub fn initialize_logging() {
    Lazy::force(&LOGGING);
}

/// A driver registry with the SQLite driver registered
pub fn registry() -> Arc<DriverRegistry> {
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(SqliteDriver::new()));
    Arc::new(registry)
}

/// A seeded, file-backed SQLite database
pub struct TestDatabase {
    _dir: TempDir,
    path: PathBuf,
    registry: Arc<DriverRegistry>,
}

impl TestDatabase {
    pub fn create() -> Result<Self> {
        initialize_logging();
        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let path = dir.path().join("sluice_test.db");

        let mut conn = SqliteConnection::open(
            path.to_str().context("temp path is not UTF-8")?,
            &SqliteOptions::default(),
        )?;
        conn.execute(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)",
            &[],
        )?;
        conn.execute(
            "INSERT INTO accounts (owner, balance) VALUES ('alice', 100), ('bob', 50)",
            &[],
        )?;
        conn.close()?;
        tracing::debug!(path = %path.display(), "seeded test database");

        Ok(Self {
            _dir: dir,
            path,
            registry: registry(),
        })
    }

    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn registry(&self) -> Arc<DriverRegistry> {
        self.registry.clone()
    }

    /// A data source over this database
    pub fn data_source(&self, config: PoolConfig) -> DriverDataSource {
        DriverDataSource::with_driver(
            "test",
            self.registry(),
            "sqlite",
            &self.url(),
            ConnectionProperties::new().with("busy_timeout_ms", 5_000),
            config,
        )
    }
}

/// Fresh database per test
#[fixture]
pub fn database() -> TestDatabase {
    match TestDatabase::create() {
        Ok(database) => database,
        Err(err) => panic!("failed to create test database: {:#}", err),
    }
}

/// Number of rows in `accounts`
pub fn account_count(conn: &Connection) -> Result<i64> {
    conn.query("SELECT COUNT(*) FROM accounts", &[])?
        .scalar()
        .and_then(|value| value.as_i64())
        .context("COUNT(*) returned no integer")
}

/// Balance of the named account
pub fn balance_of(conn: &Connection, owner: &str) -> Result<i64> {
    conn.query(
        "SELECT balance FROM accounts WHERE owner = ?",
        &[owner.into()],
    )?
    .scalar()
    .and_then(|value| value.as_i64())
    .with_context(|| format!("no account for {}", owner))
}
