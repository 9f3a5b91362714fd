//! Registry of active transactions

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sluice_core::{IsolationLevel, Result, SluiceError};

use super::context::TxContext;
use super::scope::{ScopeView, TransactionScope};
use crate::connection::PooledConnection;
use crate::datasource::DataSourceId;

/// Identity of one execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Maps each execution context to its active transaction, if any
///
/// The registry is shared by all contexts; every entry is only ever touched
/// on behalf of the context that owns it. Commit and rollback take the
/// scope out of the registry before doing any driver work, so the entry is
/// gone whatever the outcome.
pub struct TransactionManager {
    scopes: Mutex<HashMap<ContextId, TransactionScope>>,
    next_context: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scopes: Mutex::new(HashMap::new()),
            next_context: AtomicU64::new(0),
        })
    }

    /// Create the handle for a new execution context
    pub fn context(self: &Arc<Self>) -> TxContext {
        let id = ContextId(self.next_context.fetch_add(1, Ordering::Relaxed) + 1);
        TxContext::new(id, self.clone())
    }

    /// Number of contexts with an active transaction
    pub fn active_transactions(&self) -> usize {
        self.scopes.lock().len()
    }

    /// Register a transaction for `context` unless one is already active.
    /// Returns whether a new transaction was started.
    pub(crate) fn begin(&self, context: ContextId, level: IsolationLevel) -> bool {
        let mut scopes = self.scopes.lock();
        if scopes.contains_key(&context) {
            tracing::debug!(%context, "transaction already active, joining it");
            return false;
        }
        scopes.insert(context, TransactionScope::new(context, level));
        tracing::debug!(%context, isolation = %level, "transaction begun");
        true
    }

    pub(crate) fn commit(&self, context: ContextId) -> Result<()> {
        let scope = self.take(context, "commit")?;
        scope.commit()
    }

    /// Roll back and forget the context's transaction. Driver failures are
    /// logged and swallowed; the connection is already assumed broken.
    pub(crate) fn rollback(&self, context: ContextId) -> Result<()> {
        let scope = self.take(context, "rollback")?;
        if let Err(err) = scope.rollback() {
            tracing::warn!(%context, error = %err, "ignoring rollback failure");
        }
        Ok(())
    }

    fn take(&self, context: ContextId, action: &str) -> Result<TransactionScope> {
        self.scopes.lock().remove(&context).ok_or_else(|| {
            SluiceError::TransactionState(format!(
                "cannot {}: no active transaction on {}",
                action, context
            ))
        })
    }

    pub(crate) fn is_active(&self, context: ContextId) -> bool {
        self.scopes.lock().contains_key(&context)
    }

    pub(crate) fn isolation_level(&self, context: ContextId) -> Option<IsolationLevel> {
        self.scopes
            .lock()
            .get(&context)
            .map(TransactionScope::isolation_level)
    }

    pub(crate) fn view(&self, context: ContextId) -> Option<ScopeView> {
        self.scopes.lock().get(&context).map(TransactionScope::view)
    }

    pub(crate) fn manages(&self, context: ContextId, data_source: DataSourceId) -> bool {
        self.scopes
            .lock()
            .get(&context)
            .is_some_and(|scope| scope.manages(data_source))
    }

    pub(crate) fn bind(
        &self,
        context: ContextId,
        data_source: DataSourceId,
        connection: Arc<PooledConnection>,
    ) -> Result<()> {
        let mut scopes = self.scopes.lock();
        let scope = scopes.get_mut(&context).ok_or_else(|| {
            SluiceError::TransactionState(format!(
                "transaction on {} ended before a connection was bound",
                context
            ))
        })?;
        if !scope.is_beginning() {
            return Err(SluiceError::TransactionState(format!(
                "transaction on {} already owns a connection",
                context
            )));
        }
        scope.bind(data_source, connection)
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_transactions", &self.active_transactions())
            .finish()
    }
}
