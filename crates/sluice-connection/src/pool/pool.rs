//! Bounded resource pool implementation

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use sluice_core::{Result, SluiceError};

use super::config::PoolConfig;
use super::stats::PoolStats;

/// Factory trait for creating, checking and disposing of pooled resources
///
/// All three hooks run synchronously on the thread that triggered them and
/// never while the pool's internal lock is held.
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource
    type Resource: Send;

    /// Create a new resource
    fn create(&self) -> Result<Self::Resource>;

    /// Validate that an idle resource is still usable
    ///
    /// Default implementation always returns true.
    fn validate(&self, _resource: &Self::Resource) -> bool {
        true
    }

    /// Dispose of a resource that leaves the pool for good
    fn destroy(&self, resource: Self::Resource);
}

struct PoolState<T> {
    /// Idle resources, most recently released at the back
    idle: VecDeque<T>,
    /// Resources handed out and not yet released
    in_use: usize,
    /// Callers blocked in `acquire`
    waiting: usize,
    closed: bool,
}

/// A bounded pool of interchangeable resources
///
/// At most `capacity` resources are alive at any time, counting both idle
/// and borrowed ones. `acquire` blocks for up to `max_wait` when the pool is
/// exhausted; `release` never blocks.
pub struct ResourcePool<F: ResourceFactory> {
    config: PoolConfig,
    factory: F,
    state: Mutex<PoolState<F::Resource>>,
    /// Signalled whenever a slot or an idle resource frees up, and on close
    available: Condvar,
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a new pool with the given configuration and factory
    pub fn new(config: PoolConfig, factory: F) -> Self {
        tracing::debug!(
            capacity = config.capacity(),
            max_wait_ms = config.max_wait().as_millis() as u64,
            "creating resource pool"
        );
        Self {
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.capacity()),
                in_use: 0,
                waiting: 0,
                closed: false,
            }),
            available: Condvar::new(),
            config,
            factory,
        }
    }

    /// Borrow a resource from the pool
    ///
    /// This will:
    /// 1. Take an idle resource, validating it and replacing it if it is dead
    /// 2. If none is idle and the pool is below capacity, create a new one
    /// 3. Otherwise wait for a release, up to `max_wait`
    ///
    /// Returns `ResourceExhausted` when the wait elapses and `PoolClosed`
    /// once `close` has been called.
    pub fn acquire(&self) -> Result<F::Resource> {
        let deadline = Instant::now() + self.config.max_wait();
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(SluiceError::PoolClosed);
            }

            if let Some(resource) = state.idle.pop_back() {
                state.in_use += 1;
                let checked = MutexGuard::unlocked(&mut state, || self.check_out(resource));
                return self.settle(&mut state, checked);
            }

            if state.in_use < self.config.capacity() {
                state.in_use += 1;
                let created = MutexGuard::unlocked(&mut state, || self.factory.create());
                return self.settle(&mut state, created);
            }

            if Instant::now() >= deadline {
                tracing::debug!(
                    in_use = state.in_use,
                    waiting = state.waiting,
                    "pool exhausted"
                );
                return Err(SluiceError::ResourceExhausted(format!(
                    "timed out after {:?} waiting for one of {} pooled resources",
                    self.config.max_wait(),
                    self.config.capacity()
                )));
            }

            state.waiting += 1;
            self.available.wait_until(&mut state, deadline);
            state.waiting -= 1;
        }
    }

    /// Validate an idle resource, swapping it for a fresh one if needed.
    /// The caller already holds its slot.
    fn check_out(&self, resource: F::Resource) -> Result<F::Resource> {
        if self.factory.validate(&resource) {
            return Ok(resource);
        }
        tracing::warn!("idle resource failed validation, replacing it");
        self.factory.destroy(resource);
        self.factory.create()
    }

    /// Give the slot back if checking out or creating failed
    fn settle(
        &self,
        state: &mut MutexGuard<'_, PoolState<F::Resource>>,
        outcome: Result<F::Resource>,
    ) -> Result<F::Resource> {
        if outcome.is_err() {
            state.in_use -= 1;
            self.available.notify_one();
        }
        outcome
    }

    /// Return a borrowed resource to the pool
    ///
    /// If the pool was closed while the resource was out, it is destroyed
    /// instead of going back to the idle set.
    pub fn release(&self, resource: F::Resource) {
        let mut state = self.state.lock();
        debug_assert!(state.in_use > 0, "release without a matching acquire");
        state.in_use = state.in_use.saturating_sub(1);

        if state.closed {
            drop(state);
            self.available.notify_all();
            self.factory.destroy(resource);
            return;
        }

        state.idle.push_back(resource);
        drop(state);
        self.available.notify_one();
    }

    /// Give up a borrowed resource without returning it to the idle set
    pub fn discard(&self, resource: F::Resource) {
        {
            let mut state = self.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
        }
        self.available.notify_all();
        self.factory.destroy(resource);
    }

    /// Destroy every idle resource, leaving borrowed ones untouched
    ///
    /// Returns the number of resources destroyed.
    pub fn clear_idle(&self) -> usize {
        let idle: Vec<_> = {
            let mut state = self.state.lock();
            state.idle.drain(..).collect()
        };
        let count = idle.len();
        for resource in idle {
            self.factory.destroy(resource);
        }
        if count > 0 {
            tracing::debug!(count, "cleared idle resources");
            self.available.notify_all();
        }
        count
    }

    /// Shut the pool down
    ///
    /// New `acquire` calls fail fast from here on. Borrowed resources are
    /// waited for up to `max_wait`; idle resources are destroyed either way.
    /// Returns `ShutdownTimeout` if some resources were still out when the
    /// wait ended.
    pub fn close(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.max_wait();
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();

        while state.in_use > 0 {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let outstanding = state.in_use;
        let idle: Vec<_> = state.idle.drain(..).collect();
        drop(state);

        for resource in idle {
            self.factory.destroy(resource);
        }

        if outstanding > 0 {
            tracing::warn!(outstanding, "pool closed before all resources were released");
            return Err(SluiceError::ShutdownTimeout { outstanding });
        }
        tracing::info!("resource pool closed");
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let idle = state.idle.len();
        PoolStats::new(idle + state.in_use, idle, state.in_use, state.waiting)
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Get the factory backing this pool
    pub fn factory(&self) -> &F {
        &self.factory
    }
}
