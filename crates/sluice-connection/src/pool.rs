//! Bounded pooling of reusable resources
//!
//! This module provides a generic, thread-safe pool parameterized by a
//! [`ResourceFactory`], with configurable capacity, acquire wait bound and
//! statistics tracking. The connection layer instantiates it with pooled
//! database connections.
//!
//! # Example
//!
//! ```ignore
//! use sluice_connection::pool::{PoolConfig, ResourcePool};
//!
//! let config = PoolConfig::new(5).with_max_wait_ms(500);
//! let pool = ResourcePool::new(config, factory);
//! let resource = pool.acquire()?;
//! // Use resource...
//! pool.release(resource);
//! ```

mod config;
#[allow(clippy::module_inception)]
mod pool;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use pool::{ResourceFactory, ResourcePool};
pub use stats::PoolStats;
