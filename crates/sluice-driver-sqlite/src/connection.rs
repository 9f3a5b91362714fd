//! SQLite connection implementation

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, params_from_iter};
use sluice_core::{
    ConnectionProperties, IsolationLevel, QueryResult, RawConnection, RawStatement, Result, Row,
    SluiceError, StatementResult, Value,
};

/// Shared handle; `None` once the connection has been closed
type SharedConnection = Arc<Mutex<Option<RusqliteConnection>>>;

/// Open-time settings taken from connection properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteOptions {
    /// How long a statement waits on a locked database
    pub busy_timeout: Duration,
    pub foreign_keys: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            foreign_keys: true,
        }
    }
}

impl SqliteOptions {
    /// Read `busy_timeout_ms` and `foreign_keys`, keeping defaults for
    /// anything not set
    pub fn from_properties(properties: &ConnectionProperties) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            busy_timeout: properties
                .get_u64("busy_timeout_ms")?
                .map_or(defaults.busy_timeout, Duration::from_millis),
            foreign_keys: properties
                .get_bool("foreign_keys")?
                .unwrap_or(defaults.foreign_keys),
        })
    }
}

/// SQLite connection wrapper
///
/// SQLite itself is always in autocommit mode unless a transaction was
/// opened explicitly, so switching autocommit off is emulated by keeping a
/// `BEGIN` open, and reopening one after every commit or rollback.
pub struct SqliteConnection {
    conn: SharedConnection,
    auto_commit: bool,
}

impl SqliteConnection {
    /// Open a SQLite database at `path`, or `:memory:`
    pub fn open(path: &str, options: &SqliteOptions) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");

        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory().map_err(|e| {
                SluiceError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            let file_path = std::path::Path::new(path);
            if let Some(parent) = file_path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                return Err(SluiceError::Connection(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }

            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            let conn = RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
                SluiceError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    path, e
                ))
            })?;
            // Readers don't block the writer
            let _mode: String = conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
                .map_err(|e| SluiceError::Connection(format!("Failed to set journal mode: {}", e)))?;
            conn
        };

        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| SluiceError::Connection(format!("Failed to set busy timeout: {}", e)))?;
        conn.pragma_update(None, "foreign_keys", options.foreign_keys)
            .map_err(|e| SluiceError::Connection(format!("Failed to set foreign keys: {}", e)))?;

        tracing::info!(path = %path, "SQLite database connection established");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            auto_commit: true,
        })
    }

    fn with_conn<R>(&self, op: impl FnOnce(&RusqliteConnection) -> Result<R>) -> Result<R> {
        with_open(&self.conn, op)
    }

    /// End the open transaction, if any, with `COMMIT` or `ROLLBACK` and
    /// reopen one when autocommit is off
    fn finish(&mut self, verb: &str) -> Result<()> {
        let reopen = !self.auto_commit;
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch(verb)
                    .map_err(|e| SluiceError::Query(format!("Failed to {}: {}", verb, e)))?;
            }
            if reopen {
                conn.execute_batch("BEGIN")
                    .map_err(|e| SluiceError::Query(format!("Failed to begin transaction: {}", e)))?;
            }
            Ok(())
        })
    }
}

fn with_open<R>(
    conn: &Mutex<Option<RusqliteConnection>>,
    op: impl FnOnce(&RusqliteConnection) -> Result<R>,
) -> Result<R> {
    let guard = conn.lock();
    let conn = guard
        .as_ref()
        .ok_or_else(|| SluiceError::Connection("SQLite connection is closed".into()))?;
    op(conn)
}

impl RawConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.with_conn(|conn| {
            let affected = conn
                .execute(sql, params_from_iter(values_to_rusqlite(params)))
                .map_err(|e| SluiceError::Query(format!("Failed to execute statement: {}", e)))?;
            tracing::debug!(affected_rows = affected, "statement executed");
            Ok(StatementResult::new(affected as u64))
        })
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| SluiceError::Query(format!("Failed to prepare query: {}", e)))?;
            collect_rows(&mut stmt, params)
        })
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn RawStatement>> {
        // Compile once now so syntax errors surface at prepare time
        self.with_conn(|conn| {
            conn.prepare_cached(sql)
                .map_err(|e| SluiceError::Query(format!("Failed to prepare statement: {}", e)))?;
            Ok(())
        })?;
        Ok(Box::new(SqliteStatement {
            conn: self.conn.clone(),
            sql: sql.to_string(),
        }))
    }

    fn commit(&mut self) -> Result<()> {
        tracing::debug!("committing SQLite transaction");
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        tracing::debug!("rolling back SQLite transaction");
        self.finish("ROLLBACK")
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.auto_commit {
            return Ok(());
        }
        self.with_conn(|conn| {
            if enabled {
                // Switching autocommit back on commits the pending work
                if !conn.is_autocommit() {
                    conn.execute_batch("COMMIT")
                        .map_err(|e| SluiceError::Query(format!("Failed to commit: {}", e)))?;
                }
            } else {
                conn.execute_batch("BEGIN")
                    .map_err(|e| SluiceError::Query(format!("Failed to begin transaction: {}", e)))?;
            }
            Ok(())
        })?;
        self.auto_commit = enabled;
        Ok(())
    }

    fn auto_commit(&mut self) -> Result<bool> {
        Ok(self.auto_commit)
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        let read_uncommitted = match level {
            IsolationLevel::ReadUncommitted => true,
            IsolationLevel::Serializable | IsolationLevel::Default => false,
            other => {
                return Err(SluiceError::NotSupported(format!(
                    "SQLite does not support isolation level {}",
                    other
                )));
            }
        };
        self.with_conn(|conn| {
            conn.pragma_update(None, "read_uncommitted", read_uncommitted)
                .map_err(|e| SluiceError::Query(format!("Failed to set isolation level: {}", e)))
        })
    }

    fn isolation_level(&mut self) -> Result<IsolationLevel> {
        self.with_conn(|conn| {
            let read_uncommitted: i64 = conn
                .query_row("PRAGMA read_uncommitted", [], |row| row.get(0))
                .map_err(|e| SluiceError::Query(format!("Failed to read isolation level: {}", e)))?;
            Ok(if read_uncommitted != 0 {
                IsolationLevel::ReadUncommitted
            } else {
                IsolationLevel::Serializable
            })
        })
    }

    fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        tracing::info!("closing SQLite connection");
        conn.close()
            .map_err(|(_, e)| SluiceError::Connection(format!("Failed to close connection: {}", e)))
    }

    fn is_valid(&mut self, _timeout: Duration) -> Result<bool> {
        let guard = self.conn.lock();
        Ok(guard
            .as_ref()
            .is_some_and(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()))
    }
}

/// A prepared statement; the compiled form lives in rusqlite's per-connection
/// cache until the statement is closed
struct SqliteStatement {
    conn: SharedConnection,
    sql: String,
}

impl SqliteStatement {
    fn with_statement<R>(
        &self,
        op: impl FnOnce(&mut rusqlite::CachedStatement<'_>) -> Result<R>,
    ) -> Result<R> {
        with_open(&self.conn, |conn| {
            let mut stmt = conn
                .prepare_cached(&self.sql)
                .map_err(|e| SluiceError::Query(format!("Failed to prepare statement: {}", e)))?;
            op(&mut stmt)
        })
    }
}

impl RawStatement for SqliteStatement {
    fn execute(&mut self, params: &[Value]) -> Result<StatementResult> {
        self.with_statement(|stmt| {
            let affected = stmt
                .execute(params_from_iter(values_to_rusqlite(params)))
                .map_err(|e| SluiceError::Query(format!("Failed to execute statement: {}", e)))?;
            Ok(StatementResult::new(affected as u64))
        })
    }

    fn query(&mut self, params: &[Value]) -> Result<QueryResult> {
        self.with_statement(|stmt| collect_rows(stmt, params))
    }

    /// Finalizes the compiled statement rather than leaving it in rusqlite's cache
    fn close(self: Box<Self>) -> Result<()> {
        tracing::trace!(sql_preview = %self.sql.chars().take(100).collect::<String>(), "closing prepared statement");
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            // Closing the connection already finalized everything
            return Ok(());
        };
        conn.prepare_cached(&self.sql)
            .map(rusqlite::CachedStatement::discard)
            .map_err(|e| SluiceError::Query(format!("Failed to close statement: {}", e)))
    }
}

fn collect_rows(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<QueryResult> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(values_to_rusqlite(params)))
        .map_err(|e| SluiceError::Query(format!("Failed to execute query: {}", e)))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| SluiceError::Query(format!("Failed to fetch row: {}", e)))?
    {
        let values = (0..columns.len())
            .map(|idx| rusqlite_to_value(row, idx))
            .collect::<Result<Vec<_>>>()?;
        rows.push(Row::new(columns.clone(), values));
    }

    tracing::debug!(row_count = rows.len(), "query executed");
    Ok(QueryResult { columns, rows })
}

fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Int64(i) => Sql::Integer(*i),
        Value::Float64(f) => Sql::Real(*f),
        Value::String(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
    }
}

fn rusqlite_to_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| SluiceError::Query(e.to_string()))?;

    Ok(match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}
