//! Pooled data source

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use sluice_core::{ConnectionProperties, DriverRegistry, IsolationLevel, Result, SluiceError};

use super::lookup::{LookupSource, NamingContext};
use super::source::{ConnectionSource, DriverSource};
use super::{DataSource, DataSourceId};
use crate::connection::{Connection, ConnectionRecycler, PooledConnection};
use crate::pool::{PoolConfig, PoolStats, ResourceFactory, ResourcePool};
use crate::transaction::{ScopeView, TxContext};

/// Pool factory turning raw connections from a source into pooled ones
pub(crate) struct ConnectionFactory<S> {
    source: Arc<S>,
    idle_timeout: Duration,
    statement_cache_size: usize,
    next_id: AtomicU64,
    pool: Weak<dyn ConnectionRecycler>,
}

impl<S: ConnectionSource> ResourceFactory for ConnectionFactory<S> {
    type Resource = Arc<PooledConnection>;

    fn create(&self) -> Result<Arc<PooledConnection>> {
        let raw = self.source.open()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(connection_id = id, source = %self.source.describe(), "created pooled connection");
        Ok(Arc::new(PooledConnection::new(
            id,
            raw,
            self.statement_cache_size,
            self.idle_timeout,
            self.pool.clone(),
        )))
    }

    fn validate(&self, connection: &Arc<PooledConnection>) -> bool {
        connection.is_valid()
    }

    fn destroy(&self, connection: Arc<PooledConnection>) {
        connection.destroy();
    }
}

type ConnectionPool<S> = ResourcePool<ConnectionFactory<S>>;

/// A data source backed by a bounded connection pool
///
/// The pool is created on the first `get_connection`, from the
/// configuration in effect at that moment. Until then the pool settings can
/// be changed; afterwards the setters fail with `Configuration`.
pub struct PooledDataSource<S: ConnectionSource> {
    id: DataSourceId,
    name: String,
    source: Arc<S>,
    config: RwLock<PoolConfig>,
    pool: OnceCell<Arc<ConnectionPool<S>>>,
    closed: AtomicBool,
}

/// Data source opening connections through a registered driver
pub type DriverDataSource = PooledDataSource<DriverSource>;

/// Data source opening connections through a naming context lookup
pub type LookupDataSource = PooledDataSource<LookupSource>;

impl<S: ConnectionSource> PooledDataSource<S> {
    pub fn new(name: impl Into<String>, source: S, config: PoolConfig) -> Self {
        Self {
            id: DataSourceId::new(),
            name: name.into(),
            source: Arc::new(source),
            config: RwLock::new(config),
            pool: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Snapshot of the pool settings
    pub fn config(&self) -> PoolConfig {
        self.config.read().clone()
    }

    pub fn capacity(&self) -> usize {
        self.config.read().capacity()
    }

    pub fn max_idle_time(&self) -> Duration {
        self.config.read().idle_timeout()
    }

    pub fn max_wait(&self) -> Duration {
        self.config.read().max_wait()
    }

    pub fn statement_cache_size(&self) -> usize {
        self.config.read().statement_cache_size()
    }

    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(SluiceError::Configuration(
                "capacity must be greater than 0".into(),
            ));
        }
        self.update_config(|config| config.with_capacity(capacity))
    }

    pub fn set_max_idle_time(&self, idle: Duration) -> Result<()> {
        self.update_config(|config| config.with_idle_timeout_ms(duration_ms(idle)))
    }

    pub fn set_max_wait(&self, wait: Duration) -> Result<()> {
        self.update_config(|config| config.with_max_wait_ms(duration_ms(wait)))
    }

    pub fn set_statement_cache_size(&self, size: usize) -> Result<()> {
        self.update_config(|config| config.with_statement_cache_size(size))
    }

    fn update_config(&self, change: impl FnOnce(PoolConfig) -> PoolConfig) -> Result<()> {
        let mut config = self.config.write();
        if self.pool.get().is_some() {
            return Err(SluiceError::Configuration(format!(
                "data source '{}' is in use; its pool settings can no longer change",
                self.name
            )));
        }
        *config = change((*config).clone());
        Ok(())
    }

    /// The pool, created on first use
    fn pool(&self) -> Result<&Arc<ConnectionPool<S>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SluiceError::PoolClosed);
        }
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        // Held until the cell is set so no setter slips in between
        let settings = self.config.read();
        self.pool.get_or_try_init(|| {
            // `close` flips the flag under the write lock
            if self.closed.load(Ordering::SeqCst) {
                return Err(SluiceError::PoolClosed);
            }
            settings.validate()?;
            tracing::info!(
                data_source = %self.name,
                source = %self.source.describe(),
                capacity = settings.capacity(),
                "creating connection pool"
            );
            let source = self.source.clone();
            let config = (*settings).clone();
            Ok(Arc::new_cyclic(|pool: &Weak<ConnectionPool<S>>| {
                let recycler: Weak<dyn ConnectionRecycler> = pool.clone();
                let factory = ConnectionFactory {
                    source,
                    idle_timeout: config.idle_timeout(),
                    statement_cache_size: config.statement_cache_size(),
                    next_id: AtomicU64::new(0),
                    pool: recycler,
                };
                ResourcePool::new(config, factory)
            }))
        })
    }

    /// Current pool statistics; all zero before first use
    pub fn stats(&self) -> PoolStats {
        self.pool.get().map(|pool| pool.stats()).unwrap_or_default()
    }

    /// Destroy idle connections now rather than at their next checkout
    pub fn evict_idle(&self) -> usize {
        self.pool.get().map_or(0, |pool| pool.clear_idle())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn begin_on(
        &self,
        pool: &ConnectionPool<S>,
        ctx: &TxContext,
        level: IsolationLevel,
    ) -> Result<Connection> {
        let conn = pool.acquire()?;
        if let Err(err) = conn.begin_transaction(level) {
            conn.abandon();
            return Err(err);
        }
        if let Err(err) = ctx.bind(self.id, conn.clone()) {
            if let Err(rollback_err) = conn.rollback_transaction() {
                tracing::warn!(connection_id = conn.id(), error = %rollback_err, "rollback of unbound connection failed");
            }
            return Err(err);
        }
        Ok(Connection::new(conn))
    }
}

impl PooledDataSource<DriverSource> {
    /// Data source over `driver` at `url`
    pub fn with_driver(
        name: impl Into<String>,
        registry: Arc<DriverRegistry>,
        driver: &str,
        url: &str,
        properties: ConnectionProperties,
        config: PoolConfig,
    ) -> Self {
        let source = DriverSource::new(registry, driver, url).with_properties(properties);
        Self::new(name, source, config)
    }
}

impl PooledDataSource<LookupSource> {
    /// Data source over the connection source bound to `lookup_name`
    pub fn with_lookup(
        name: impl Into<String>,
        context: Arc<dyn NamingContext>,
        lookup_name: &str,
        config: PoolConfig,
    ) -> Self {
        Self::new(name, LookupSource::new(context, lookup_name), config)
    }
}

impl<S: ConnectionSource> DataSource for PooledDataSource<S> {
    fn id(&self) -> DataSourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn get_connection(&self, ctx: &TxContext) -> Result<Connection> {
        let pool = self.pool()?;
        match ctx.view() {
            None => {
                let conn = pool.acquire()?;
                tracing::trace!(data_source = %self.name, connection_id = conn.id(), "connection checked out");
                Ok(Connection::new(conn))
            }
            Some(ScopeView::Beginning(level)) => self.begin_on(pool, ctx, level),
            Some(ScopeView::Bound {
                data_source,
                connection,
            }) if data_source == self.id => Ok(Connection::new(connection)),
            Some(ScopeView::Bound { data_source, .. }) => {
                Err(SluiceError::TransactionState(format!(
                    "transaction on {} is bound to data source {}; '{}' cannot join it",
                    ctx.id(),
                    data_source,
                    self.name
                )))
            }
        }
    }

    /// Close the pool, waiting up to `max_wait` for borrowed connections
    ///
    /// Idle connections are destroyed even when the wait runs out, in which
    /// case `ShutdownTimeout` reports how many were still borrowed.
    fn close(&self) -> Result<()> {
        {
            // Waits out a pool being created right now
            let _settings = self.config.write();
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
        }
        tracing::info!(data_source = %self.name, "closing data source");
        match self.pool.get() {
            Some(pool) => pool.close(),
            None => Ok(()),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
