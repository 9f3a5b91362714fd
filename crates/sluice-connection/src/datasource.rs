//! Data sources
//!
//! A [`DataSource`] is where callers get connections. [`PooledDataSource`]
//! is the one implementation: it owns a [`ResourcePool`] of pooled
//! connections and cooperates with the caller's [`TxContext`]. Where the raw
//! connections come from is a [`ConnectionSource`], either a registered
//! driver ([`DriverSource`]) or a factory published in a naming context
//! ([`LookupSource`]).
//!
//! [`ResourcePool`]: crate::pool::ResourcePool

mod config;
mod lookup;
mod pooled;
mod source;


use std::fmt;

use serde::{Deserialize, Serialize};
use sluice_core::Result;
use uuid::Uuid;

use crate::connection::Connection;
use crate::transaction::TxContext;

pub use config::{DataSourceConfig, SourceConfig};
pub use lookup::{InMemoryNamingContext, LookupSource, NamingContext};
pub use pooled::{DriverDataSource, LookupDataSource, PooledDataSource};
pub use source::{ConnectionSource, DriverSource};

/// Unique identifier of a data source instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceId(Uuid);

impl DataSourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DataSourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out database connections
pub trait DataSource: Send + Sync {
    fn id(&self) -> DataSourceId;

    fn name(&self) -> &str;

    /// Get a connection for the caller's context
    ///
    /// Without an active transaction this is a plain pool checkout. The first
    /// call inside a transaction binds a connection to it; later calls in the
    /// same transaction return that same connection.
    fn get_connection(&self, ctx: &TxContext) -> Result<Connection>;

    /// Stop handing out connections and release pooled ones
    fn close(&self) -> Result<()>;
}
