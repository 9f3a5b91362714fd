//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_core::{Result, SluiceError};

/// Configuration for a connection pool
///
/// Controls pool sizing, waiting, idle recycling and the per-connection
/// prepared statement cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of live resources (idle + in use)
    capacity: usize,
    /// Upper bound in milliseconds on how long `acquire` blocks
    max_wait_ms: u64,
    /// Milliseconds after which an idle connection is recycled
    idle_timeout_ms: u64,
    /// Prepared statements cached per connection (0 disables caching)
    statement_cache_size: usize,
}

impl PoolConfig {
    /// Create a new pool configuration with the given capacity
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0,
            "capacity must be greater than 0, got {}",
            capacity
        );

        Self {
            capacity,
            max_wait_ms: 30_000,     // 30 seconds default
            idle_timeout_ms: 600_000, // 10 minutes default
            statement_cache_size: 0,
        }
    }

    /// Set the capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the maximum acquire wait in milliseconds
    pub fn with_max_wait_ms(mut self, wait_ms: u64) -> Self {
        self.max_wait_ms = wait_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the number of prepared statements cached per connection
    pub fn with_statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Get the capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the maximum acquire wait as a Duration
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the statement cache size
    pub fn statement_cache_size(&self) -> usize {
        self.statement_cache_size
    }

    /// Check a configuration that did not go through `new`, e.g. one
    /// deserialized from a file
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(SluiceError::Configuration(
                "capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - capacity: 10
    /// - max_wait: 30 seconds
    /// - idle_timeout: 10 minutes
    /// - statement_cache_size: 0 (disabled)
    fn default() -> Self {
        Self::new(10)
    }
}
