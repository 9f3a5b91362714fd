//! Per-context transaction state

use std::sync::Arc;

use sluice_core::{IsolationLevel, Result, SluiceError};

use super::manager::ContextId;
use crate::connection::PooledConnection;
use crate::datasource::DataSourceId;

enum ScopeState {
    /// Begun, no data source has handed out a connection yet
    Created,
    /// Owns one connection of one data source until commit or rollback
    Bound {
        data_source: DataSourceId,
        connection: Arc<PooledConnection>,
    },
}

/// What a data source needs to know about the caller's transaction
pub(crate) enum ScopeView {
    Beginning(IsolationLevel),
    Bound {
        data_source: DataSourceId,
        connection: Arc<PooledConnection>,
    },
}

/// The transaction registered for one execution context
pub(crate) struct TransactionScope {
    context: ContextId,
    isolation_level: IsolationLevel,
    state: ScopeState,
}

impl TransactionScope {
    pub(crate) fn new(context: ContextId, isolation_level: IsolationLevel) -> Self {
        Self {
            context,
            isolation_level,
            state: ScopeState::Created,
        }
    }

    pub(crate) fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// True until a data source binds a connection
    pub(crate) fn is_beginning(&self) -> bool {
        matches!(self.state, ScopeState::Created)
    }

    /// Whether this scope is bound to exactly `data_source`
    pub(crate) fn manages(&self, data_source: DataSourceId) -> bool {
        matches!(&self.state, ScopeState::Bound { data_source: bound, .. } if *bound == data_source)
    }

    pub(crate) fn view(&self) -> ScopeView {
        match &self.state {
            ScopeState::Created => ScopeView::Beginning(self.isolation_level),
            ScopeState::Bound {
                data_source,
                connection,
            } => ScopeView::Bound {
                data_source: *data_source,
                connection: connection.clone(),
            },
        }
    }

    /// Hand the scope its connection. A scope is bound at most once.
    pub(crate) fn bind(
        &mut self,
        data_source: DataSourceId,
        connection: Arc<PooledConnection>,
    ) -> Result<()> {
        if let ScopeState::Bound {
            data_source: bound, ..
        } = &self.state
        {
            return Err(SluiceError::TransactionState(format!(
                "transaction of context {} is already bound to data source {}",
                self.context, bound
            )));
        }
        tracing::debug!(
            context = %self.context,
            data_source = %data_source,
            connection_id = connection.id(),
            "transaction bound to connection"
        );
        self.state = ScopeState::Bound {
            data_source,
            connection,
        };
        Ok(())
    }

    /// Commit the bound connection, if any. A scope that never bound a
    /// connection did no work, so committing it succeeds trivially.
    pub(crate) fn commit(self) -> Result<()> {
        match self.state {
            ScopeState::Created => Ok(()),
            ScopeState::Bound { connection, .. } => connection.commit_transaction(),
        }
    }

    pub(crate) fn rollback(self) -> Result<()> {
        match self.state {
            ScopeState::Created => Ok(()),
            ScopeState::Bound { connection, .. } => connection.rollback_transaction(),
        }
    }
}
