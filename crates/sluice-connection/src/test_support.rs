//! Scripted raw connections shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sluice_core::{
    IsolationLevel, QueryResult, RawConnection, RawStatement, Result, Row, SluiceError,
    StatementResult, Value,
};

use crate::datasource::ConnectionSource;

/// Counters and failure switches shared by every connection a
/// [`MockSource`] opens
#[derive(Default)]
pub(crate) struct MockBackend {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub prepared: AtomicUsize,
    pub statements_closed: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
    /// Makes re-enabling autocommit fail
    pub fail_restore: AtomicBool,
    pub fail_isolation: AtomicBool,
    pub log: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        Self::count(&self.opened)
    }

    pub fn closed(&self) -> usize {
        Self::count(&self.closed)
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    pub fn connect(self: &Arc<Self>) -> MockConnection {
        self.opened.fetch_add(1, Ordering::SeqCst);
        MockConnection {
            backend: self.clone(),
            auto_commit: true,
            isolation: IsolationLevel::ReadCommitted,
        }
    }
}

/// Raw connection that starts in autocommit at READ_COMMITTED, like most
/// servers do. Any SQL starting with `FAIL` errors.
pub(crate) struct MockConnection {
    backend: Arc<MockBackend>,
    pub auto_commit: bool,
    pub isolation: IsolationLevel,
}

impl MockConnection {
    fn record(&self, entry: impl Into<String>) {
        self.backend.log.lock().push(entry.into());
    }
}

fn check_sql(sql: &str) -> Result<()> {
    if sql.starts_with("FAIL") {
        return Err(SluiceError::Query(format!("cannot run '{}'", sql)));
    }
    Ok(())
}

impl RawConnection for MockConnection {
    fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        check_sql(sql)?;
        self.record(format!("execute {}", sql));
        Ok(StatementResult::new(1))
    }

    fn query(&mut self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        check_sql(sql)?;
        self.record(format!("query {}", sql));
        Ok(QueryResult {
            columns: vec!["n".into()],
            rows: vec![Row::new(vec!["n".into()], vec![Value::Int64(1)])],
        })
    }

    fn prepare(&mut self, sql: &str) -> Result<Box<dyn RawStatement>> {
        check_sql(sql)?;
        self.backend.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement {
            backend: self.backend.clone(),
        }))
    }

    fn commit(&mut self) -> Result<()> {
        if self.backend.fail_commit.load(Ordering::SeqCst) {
            return Err(SluiceError::Connection("commit lost the server".into()));
        }
        self.backend.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.backend.fail_rollback.load(Ordering::SeqCst) {
            return Err(SluiceError::Connection("rollback lost the server".into()));
        }
        self.backend.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.backend.fail_restore.load(Ordering::SeqCst) {
            return Err(SluiceError::Connection("cannot re-enable autocommit".into()));
        }
        self.record(format!("auto_commit {}", enabled));
        self.auto_commit = enabled;
        Ok(())
    }

    fn auto_commit(&mut self) -> Result<bool> {
        Ok(self.auto_commit)
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        if self.backend.fail_isolation.load(Ordering::SeqCst) {
            return Err(SluiceError::NotSupported(format!("isolation {}", level)));
        }
        self.record(format!("isolation {}", level));
        self.isolation = level;
        Ok(())
    }

    fn isolation_level(&mut self) -> Result<IsolationLevel> {
        Ok(self.isolation)
    }

    fn close(&mut self) -> Result<()> {
        self.backend.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_valid(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }
}

struct MockStatement {
    backend: Arc<MockBackend>,
}

impl RawStatement for MockStatement {
    fn execute(&mut self, _params: &[Value]) -> Result<StatementResult> {
        Ok(StatementResult::new(1))
    }

    fn query(&mut self, _params: &[Value]) -> Result<QueryResult> {
        Ok(QueryResult::empty())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.backend.statements_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connection source over a [`MockBackend`]
pub(crate) struct MockSource {
    pub backend: Arc<MockBackend>,
}

impl MockSource {
    pub fn new(backend: &Arc<MockBackend>) -> Self {
        Self {
            backend: backend.clone(),
        }
    }
}

impl ConnectionSource for MockSource {
    fn open(&self) -> Result<Box<dyn RawConnection>> {
        if self.backend.fail_open.load(Ordering::SeqCst) {
            return Err(SluiceError::Connection("connection refused".into()));
        }
        Ok(Box::new(self.backend.connect()))
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}

pub(crate) fn mock_data_source(
    backend: &Arc<MockBackend>,
    config: crate::pool::PoolConfig,
) -> crate::datasource::PooledDataSource<MockSource> {
    crate::datasource::PooledDataSource::new("mock", MockSource::new(backend), config)
}
