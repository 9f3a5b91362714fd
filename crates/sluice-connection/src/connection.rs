//! Pooled database connections
//!
//! [`PooledConnection`] wraps one raw driver connection for its whole life
//! in a pool. Every call that reaches the driver goes through a single
//! choke point which marks the connection unhealthy on failure, so a
//! connection that ever errored is destroyed instead of being handed out
//! again. [`Connection`] is the handle callers receive from a data source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sluice_core::{
    IsolationLevel, QueryResult, RawConnection, RawStatement, Result, SluiceError,
    StatementResult, Value,
};

use crate::pool::{ResourceFactory, ResourcePool};
use crate::statement_cache::{Fingerprint, StatementCache};

/// Where a pooled connection goes when its borrower is done with it
pub(crate) trait ConnectionRecycler: Send + Sync {
    fn recycle(&self, connection: Arc<PooledConnection>);
    fn discard(&self, connection: Arc<PooledConnection>);
}

impl<F> ConnectionRecycler for ResourcePool<F>
where
    F: ResourceFactory<Resource = Arc<PooledConnection>>,
{
    fn recycle(&self, connection: Arc<PooledConnection>) {
        self.release(connection);
    }

    fn discard(&self, connection: Arc<PooledConnection>) {
        ResourcePool::discard(self, connection);
    }
}

struct ConnectionInner {
    raw: Box<dyn RawConnection>,
    statements: Option<StatementCache>,
    /// Isolation level to restore when the current transaction ends
    saved_isolation: Option<IsolationLevel>,
    /// Whether autocommit was switched off for the current transaction
    restore_auto_commit: bool,
    idle_since: Instant,
    destroyed: bool,
}

/// A raw connection owned by a pool
pub struct PooledConnection {
    id: u64,
    inner: Mutex<ConnectionInner>,
    has_error: AtomicBool,
    in_transaction: AtomicBool,
    /// Bumped every time the connection goes back to the pool, which
    /// invalidates handles issued to the previous borrower
    lease: AtomicU64,
    idle_timeout: Duration,
    pool: Weak<dyn ConnectionRecycler>,
}

impl PooledConnection {
    pub(crate) fn new(
        id: u64,
        raw: Box<dyn RawConnection>,
        statement_cache_size: usize,
        idle_timeout: Duration,
        pool: Weak<dyn ConnectionRecycler>,
    ) -> Self {
        Self {
            id,
            inner: Mutex::new(ConnectionInner {
                raw,
                statements: StatementCache::new(statement_cache_size),
                saved_isolation: None,
                restore_auto_commit: false,
                idle_since: Instant::now(),
                destroyed: false,
            }),
            has_error: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
            lease: AtomicU64::new(0),
            idle_timeout,
            pool,
        }
    }

    /// Identifier unique within the owning data source
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether any driver call on this connection has failed
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Whether a transaction currently owns this connection
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    pub(crate) fn lease(&self) -> u64 {
        self.lease.load(Ordering::SeqCst)
    }

    /// Healthy and not idle for longer than the idle timeout
    pub fn is_valid(&self) -> bool {
        if self.has_error() {
            return false;
        }
        let inner = self.inner.lock();
        !inner.destroyed && inner.idle_since.elapsed() <= self.idle_timeout
    }

    /// Number of prepared statements resident in the cache
    pub fn cached_statements(&self) -> usize {
        self.inner
            .lock()
            .statements
            .as_ref()
            .map_or(0, StatementCache::len)
    }

    /// Whether the statement for `sql` is resident in the cache
    pub fn is_statement_cached(&self, sql: &str) -> bool {
        self.inner
            .lock()
            .statements
            .as_ref()
            .is_some_and(|cache| cache.contains(&Fingerprint::of(sql)))
    }

    /// Run `op` against the driver, flagging the connection on failure.
    /// The error itself is passed through untouched.
    fn guarded<R>(&self, op: impl FnOnce(&mut ConnectionInner) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.lock();
        if inner.destroyed {
            return Err(SluiceError::Connection(format!(
                "connection {} is closed",
                self.id
            )));
        }
        let result = op(&mut inner);
        if let Err(err) = &result {
            self.mark_failed(err);
        }
        result
    }

    fn mark_failed(&self, err: &SluiceError) {
        if !self.has_error.swap(true, Ordering::SeqCst) {
            tracing::warn!(connection_id = self.id, error = %err, "connection marked unhealthy");
        }
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.guarded(|inner| inner.raw.execute(sql, params))
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.guarded(|inner| inner.raw.query(sql, params))
    }

    /// Prepare `sql`, leaving it in the statement cache when caching is on
    pub fn prepare(&self, sql: &str) -> Result<Fingerprint> {
        let fingerprint = Fingerprint::of(sql);
        self.guarded(|inner| {
            let ConnectionInner {
                raw, statements, ..
            } = inner;
            match statements {
                Some(cache) => cache
                    .get_or_prepare(fingerprint, || raw.prepare(sql))
                    .map(|_| ()),
                None => raw.prepare(sql)?.close(),
            }
        })?;
        Ok(fingerprint)
    }

    pub fn execute_prepared(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.with_statement(sql, |statement| statement.execute(params))
    }

    pub fn query_prepared(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.with_statement(sql, |statement| statement.query(params))
    }

    fn with_statement<R>(
        &self,
        sql: &str,
        run: impl FnOnce(&mut dyn RawStatement) -> Result<R>,
    ) -> Result<R> {
        self.guarded(|inner| {
            let ConnectionInner {
                raw, statements, ..
            } = inner;
            match statements {
                Some(cache) => {
                    let statement = cache.get_or_prepare(Fingerprint::of(sql), || raw.prepare(sql))?;
                    run(&mut **statement)
                }
                None => {
                    let mut statement = raw.prepare(sql)?;
                    let result = run(&mut *statement);
                    if let Err(err) = statement.close() {
                        tracing::debug!(connection_id = self.id, error = %err, "failed to close one-shot statement");
                    }
                    result
                }
            }
        })
    }

    pub fn commit(&self) -> Result<()> {
        self.guarded(|inner| inner.raw.commit())
    }

    pub fn rollback(&self) -> Result<()> {
        self.guarded(|inner| inner.raw.rollback())
    }

    pub fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.guarded(|inner| inner.raw.set_auto_commit(enabled))
    }

    pub fn auto_commit(&self) -> Result<bool> {
        self.guarded(|inner| inner.raw.auto_commit())
    }

    pub fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.guarded(|inner| inner.raw.set_isolation_level(level))
    }

    pub fn isolation_level(&self) -> Result<IsolationLevel> {
        self.guarded(|inner| inner.raw.isolation_level())
    }

    /// Ask the driver whether the connection still responds
    pub fn ping(&self, timeout: Duration) -> Result<bool> {
        self.guarded(|inner| inner.raw.is_valid(timeout))
    }

    /// Prepare the connection to be owned by a transaction
    ///
    /// Switches to `level` unless it is `Default` or already in effect, and
    /// turns autocommit off if it is on. Both changes are remembered so the
    /// transaction's end can undo them.
    pub(crate) fn begin_transaction(&self, level: IsolationLevel) -> Result<()> {
        self.guarded(|inner| {
            if !level.is_default() {
                let current = inner.raw.isolation_level()?;
                if current != level {
                    inner.raw.set_isolation_level(level)?;
                    inner.saved_isolation = Some(current);
                }
            }
            if inner.raw.auto_commit()? {
                inner.raw.set_auto_commit(false)?;
                inner.restore_auto_commit = true;
            }
            Ok(())
        })?;
        self.in_transaction.store(true, Ordering::SeqCst);
        tracing::debug!(connection_id = self.id, isolation = %level, "transaction started on connection");
        Ok(())
    }

    /// Commit the transaction owning this connection, restore the state
    /// `begin_transaction` changed and return the connection to its pool
    ///
    /// Restoration and the return to the pool happen even when the commit
    /// fails; the commit error wins over a restore error.
    pub(crate) fn commit_transaction(self: &Arc<Self>) -> Result<()> {
        self.owned_by_transaction("commit")?;
        let committed = self.guarded(|inner| inner.raw.commit());
        let restored = self.restore_transaction_state();
        if let (Err(_), Err(err)) = (&committed, &restored) {
            tracing::warn!(connection_id = self.id, error = %err, "state restore failed after failed commit");
        }
        self.end_transaction();
        tracing::debug!(connection_id = self.id, ok = committed.is_ok(), "transaction committed");
        committed.and(restored)
    }

    /// Roll back the transaction owning this connection, restore the state
    /// `begin_transaction` changed and return the connection to its pool
    ///
    /// Restore failures are logged and dropped; only the rollback's own
    /// failure is returned.
    pub(crate) fn rollback_transaction(self: &Arc<Self>) -> Result<()> {
        self.owned_by_transaction("roll back")?;
        let rolled_back = self.guarded(|inner| inner.raw.rollback());
        if let Err(err) = self.restore_transaction_state() {
            tracing::warn!(connection_id = self.id, error = %err, "ignoring state restore failure after rollback");
        }
        self.end_transaction();
        tracing::debug!(connection_id = self.id, ok = rolled_back.is_ok(), "transaction rolled back");
        rolled_back
    }

    fn restore_transaction_state(&self) -> Result<()> {
        self.guarded(|inner| {
            let mut outcome = Ok(());
            if std::mem::take(&mut inner.restore_auto_commit) {
                outcome = inner.raw.set_auto_commit(true);
            }
            if let Some(level) = inner.saved_isolation.take() {
                let reset = inner.raw.set_isolation_level(level);
                if outcome.is_ok() {
                    outcome = reset;
                }
            }
            outcome
        })
    }

    fn owned_by_transaction(&self, verb: &str) -> Result<()> {
        if self.in_transaction() {
            return Ok(());
        }
        Err(SluiceError::TransactionState(format!(
            "cannot {} transaction on connection {}: no transaction owns it",
            verb, self.id
        )))
    }

    /// Only the caller that clears the flag returns the connection
    fn end_transaction(self: &Arc<Self>) {
        if self.in_transaction.swap(false, Ordering::SeqCst) {
            self.release();
        }
    }

    /// Hand the connection back to its pool, resetting the idle timer
    pub(crate) fn release(self: &Arc<Self>) {
        self.inner.lock().idle_since = Instant::now();
        self.lease.fetch_add(1, Ordering::SeqCst);
        match self.pool.upgrade() {
            Some(pool) => pool.recycle(self.clone()),
            None => self.destroy(),
        }
    }

    /// Drop the connection from its pool without making it available again
    pub(crate) fn abandon(self: &Arc<Self>) {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.lease.fetch_add(1, Ordering::SeqCst);
        match self.pool.upgrade() {
            Some(pool) => pool.discard(self.clone()),
            None => self.destroy(),
        }
    }

    /// Close cached statements and then the raw connection, ignoring errors
    pub(crate) fn destroy(&self) {
        let mut inner = self.inner.lock();
        if std::mem::replace(&mut inner.destroyed, true) {
            return;
        }
        if let Some(cache) = inner.statements.as_mut() {
            cache.clear();
        }
        if let Err(err) = inner.raw.close() {
            tracing::warn!(connection_id = self.id, error = %err, "failed to close raw connection");
        }
        tracing::debug!(connection_id = self.id, "connection destroyed");
    }
}

/// A connection handed out by a data source
///
/// Outside a transaction, closing or dropping the handle returns the
/// connection to the pool. Inside a transaction the transaction owns the
/// connection and closing the handle does nothing; the connection goes back
/// on commit or rollback, after which any handle still around reports a
/// `TransactionState` error.
pub struct Connection {
    conn: Option<Arc<PooledConnection>>,
    lease: u64,
}

impl Connection {
    pub(crate) fn new(conn: Arc<PooledConnection>) -> Self {
        let lease = conn.lease();
        Self {
            conn: Some(conn),
            lease,
        }
    }

    fn checked(&self) -> Result<&Arc<PooledConnection>> {
        match &self.conn {
            Some(conn) if conn.lease() == self.lease => Ok(conn),
            Some(_) => Err(SluiceError::TransactionState(
                "connection was returned to the pool when its transaction ended".into(),
            )),
            None => Err(SluiceError::Connection("connection handle is closed".into())),
        }
    }

    /// Id of the underlying pooled connection
    pub fn id(&self) -> Option<u64> {
        self.conn.as_ref().map(|conn| conn.id())
    }

    /// Whether both handles refer to the same pooled connection
    pub fn same_connection(&self, other: &Connection) -> bool {
        match (&self.conn, &other.conn) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Whether a transaction owns the underlying connection
    pub fn is_transactional(&self) -> bool {
        self.checked().is_ok_and(|conn| conn.in_transaction())
    }

    /// The pooled connection behind this handle
    pub fn pooled(&self) -> Result<&Arc<PooledConnection>> {
        self.checked()
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.checked()?.execute(sql, params)
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.checked()?.query(sql, params)
    }

    pub fn prepare(&self, sql: &str) -> Result<Fingerprint> {
        self.checked()?.prepare(sql)
    }

    pub fn execute_prepared(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.checked()?.execute_prepared(sql, params)
    }

    pub fn query_prepared(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.checked()?.query_prepared(sql, params)
    }

    /// Commit on the raw connection; refused while a transaction context
    /// owns the connection
    pub fn commit(&self) -> Result<()> {
        self.unmanaged()?.commit()
    }

    /// Roll back on the raw connection; refused while a transaction context
    /// owns the connection
    pub fn rollback(&self) -> Result<()> {
        self.unmanaged()?.rollback()
    }

    pub fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.unmanaged()?.set_auto_commit(enabled)
    }

    pub fn auto_commit(&self) -> Result<bool> {
        self.checked()?.auto_commit()
    }

    pub fn set_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        self.unmanaged()?.set_isolation_level(level)
    }

    pub fn isolation_level(&self) -> Result<IsolationLevel> {
        self.checked()?.isolation_level()
    }

    pub fn ping(&self, timeout: Duration) -> Result<bool> {
        self.checked()?.ping(timeout)
    }

    fn unmanaged(&self) -> Result<&Arc<PooledConnection>> {
        let conn = self.checked()?;
        if conn.in_transaction() {
            return Err(SluiceError::TransactionState(
                "connection is managed by an active transaction; use the transaction context".into(),
            ));
        }
        Ok(conn)
    }

    /// Done with the connection
    ///
    /// Returns it to the pool unless a transaction owns it.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if conn.lease() != self.lease || conn.in_transaction() {
            return;
        }
        conn.release();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close_inner();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("lease", &self.lease)
            .finish()
    }
}
