//! Sluice Connection - Pooled data sources with context-scoped transactions
//!
//! This crate provides:
//!
//! - `ResourcePool` - A bounded, blocking pool over any `ResourceFactory`
//! - `StatementCache` - Per-connection LRU cache of prepared statements
//! - `PooledConnection` / `Connection` - Health-tracking connection proxy and
//!   the handle callers borrow
//! - `PooledDataSource` - The `DataSource` facade, fed either by a driver or
//!   by a naming context lookup
//! - `TransactionManager` / `TxContext` - One transaction per execution
//!   context, bound to a single pooled connection until commit or rollback

pub mod connection;
pub mod datasource;
pub mod pool;
pub mod statement_cache;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use connection::{Connection, PooledConnection};
pub use datasource::{
    ConnectionSource, DataSource, DataSourceConfig, DataSourceId, DriverDataSource, DriverSource,
    InMemoryNamingContext, LookupDataSource, LookupSource, NamingContext, PooledDataSource,
    SourceConfig,
};
pub use pool::{PoolConfig, PoolStats, ResourceFactory, ResourcePool};
pub use statement_cache::{Fingerprint, StatementCache};
pub use transaction::{ContextId, TransactionManager, TxContext};
