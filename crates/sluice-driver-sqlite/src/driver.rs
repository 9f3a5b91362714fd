//! SQLite driver implementation

use sluice_core::{ConnectionProperties, Driver, RawConnection, Result, SluiceError};

use crate::{SqliteConnection, SqliteOptions};

/// SQLite database driver
///
/// The URL is a database file path or `:memory:`. Recognised properties are
/// `busy_timeout_ms` and `foreign_keys`.
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver instance
    pub fn new() -> Self {
        tracing::debug!("SQLite driver initialized");
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn display_name(&self) -> &'static str {
        "SQLite"
    }

    #[tracing::instrument(skip(self, properties))]
    fn connect(
        &self,
        url: &str,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn RawConnection>> {
        if url.is_empty() {
            return Err(SluiceError::Configuration(
                "SQLite requires a database path or ':memory:'".into(),
            ));
        }
        let options = SqliteOptions::from_properties(properties)?;
        let conn = SqliteConnection::open(url, &options).inspect_err(|e| {
            tracing::error!(error = %e, "failed to connect to SQLite database");
        })?;
        Ok(Box::new(conn))
    }
}
