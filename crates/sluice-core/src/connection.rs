//! Raw connection and statement traits implemented by drivers

use std::time::Duration;

use crate::{IsolationLevel, QueryResult, Result, StatementResult, Value};

/// A physical database connection as opened by a driver
///
/// Implementations are used by exactly one borrower at a time, so every
/// method takes `&mut self`. They must be `Send` because the pool hands
/// a connection to whichever thread acquires it next.
pub trait RawConnection: Send {
    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE/DDL)
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Prepare a statement for repeated execution
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn RawStatement>>;

    /// Commit the current transaction
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction
    fn rollback(&mut self) -> Result<()>;

    /// Switch autocommit mode on or off
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Current autocommit mode
    fn auto_commit(&mut self) -> Result<bool>;

    /// Change the isolation level used by subsequent transactions
    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()>;

    /// Isolation level currently in effect
    fn isolation_level(&mut self) -> Result<IsolationLevel>;

    /// Close the physical connection
    fn close(&mut self) -> Result<()>;

    /// Ask the server whether the connection is still usable
    fn is_valid(&mut self, timeout: Duration) -> Result<bool>;
}

/// A prepared statement owned by a raw connection
pub trait RawStatement: Send {
    /// Execute the prepared statement with parameters
    fn execute(&mut self, params: &[Value]) -> Result<StatementResult>;

    /// Query the prepared statement with parameters
    fn query(&mut self, params: &[Value]) -> Result<QueryResult>;

    /// Close/deallocate the prepared statement
    fn close(self: Box<Self>) -> Result<()>;
}
