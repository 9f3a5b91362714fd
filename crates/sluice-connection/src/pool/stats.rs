//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Statistics about a pool's current state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of live resources (idle + active)
    total: usize,
    /// Number of idle resources available in the pool
    idle: usize,
    /// Number of resources currently borrowed
    active: usize,
    /// Number of callers blocked in `acquire`
    waiting: usize,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self {
            total,
            idle,
            active,
            waiting,
        }
    }

    /// Get the total number of live resources
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of idle resources
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the number of active (borrowed) resources
    pub fn active(&self) -> usize {
        self.active
    }

    /// Get the number of waiting callers
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Share of live resources currently borrowed; 0.0 for an empty pool
    pub fn utilization(&self) -> f64 {
        match self.total {
            0 => 0.0,
            total => self.active as f64 / total as f64,
        }
    }

    /// Check if every live resource is borrowed
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total > 0
    }
}
