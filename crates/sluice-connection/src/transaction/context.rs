//! Execution context handle

use std::marker::PhantomData;
use std::sync::Arc;

use sluice_core::{IsolationLevel, Result, SluiceError};

use super::manager::{ContextId, TransactionManager};
use super::scope::ScopeView;
use crate::connection::PooledConnection;
use crate::datasource::DataSourceId;

/// Handle naming one execution context to the transaction manager
///
/// A context has at most one active transaction. The handle is neither
/// `Send` nor `Sync`: a transaction lives and dies on the thread that began
/// it. Dropping a handle whose transaction is still active rolls it back.
pub struct TxContext {
    id: ContextId,
    manager: Arc<TransactionManager>,
    _not_send: PhantomData<*const ()>,
}

impl TxContext {
    pub(crate) fn new(id: ContextId, manager: Arc<TransactionManager>) -> Self {
        Self {
            id,
            manager,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Begin a transaction at `level`
    ///
    /// Does nothing if one is already active on this context: the first
    /// `begin` wins and later ones join it. Returns whether a new
    /// transaction was started.
    pub fn begin(&self, level: IsolationLevel) -> bool {
        self.manager.begin(self.id, level)
    }

    /// Commit the active transaction
    ///
    /// Fails with `TransactionState` if none is active. The transaction is
    /// over once this returns, whether the commit succeeded or not.
    pub fn commit(&self) -> Result<()> {
        self.manager.commit(self.id)
    }

    /// Roll back the active transaction
    ///
    /// Fails with `TransactionState` if none is active; driver failures
    /// during rollback are logged, not returned.
    pub fn rollback(&self) -> Result<()> {
        self.manager.rollback(self.id)
    }

    pub fn is_active(&self) -> bool {
        self.manager.is_active(self.id)
    }

    /// Isolation level requested by the active transaction
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.manager.isolation_level(self.id)
    }

    /// Whether the active transaction is bound to `data_source`
    pub fn manages(&self, data_source: DataSourceId) -> bool {
        self.manager.manages(self.id, data_source)
    }

    /// Run `body` inside a transaction
    ///
    /// If a transaction is already active the body simply joins it and the
    /// outer owner decides how it ends. Otherwise a transaction is begun at
    /// `level`, committed when `body` returns `Ok`, and rolled back when it
    /// returns `Err`, in which case the body's error is returned.
    pub fn transaction<T, E, F>(&self, level: IsolationLevel, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&TxContext) -> std::result::Result<T, E>,
        E: From<SluiceError>,
    {
        if !self.begin(level) {
            return body(self);
        }

        match body(self) {
            Ok(value) => {
                // The body may have ended the transaction itself
                if self.is_active() {
                    self.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if self.is_active()
                    && let Err(rollback_err) = self.rollback()
                {
                    tracing::warn!(context = %self.id, error = %rollback_err, "rollback after failed body failed");
                }
                Err(err)
            }
        }
    }

    pub(crate) fn view(&self) -> Option<ScopeView> {
        self.manager.view(self.id)
    }

    pub(crate) fn bind(
        &self,
        data_source: DataSourceId,
        connection: Arc<PooledConnection>,
    ) -> Result<()> {
        self.manager.bind(self.id, data_source, connection)
    }
}

impl Drop for TxContext {
    fn drop(&mut self) {
        if self.manager.is_active(self.id) {
            tracing::warn!(context = %self.id, "context dropped with an active transaction, rolling back");
            if let Err(err) = self.manager.rollback(self.id) {
                tracing::warn!(context = %self.id, error = %err, "rollback on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for TxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxContext")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
