//! Tests for resource pool functionality

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use sluice_core::{Result, SluiceError};

use super::config::PoolConfig;
use super::pool::{ResourceFactory, ResourcePool};
use super::stats::PoolStats;

/// Mock resource with a health switch shared with the test
#[derive(Debug)]
struct MockResource {
    id: usize,
    healthy: Arc<AtomicBool>,
}

/// Mock factory that counts resources created and destroyed
#[derive(Default)]
struct MockFactory {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    fail_create: AtomicBool,
}

impl MockFactory {
    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl ResourceFactory for Arc<MockFactory> {
    type Resource = MockResource;

    fn create(&self) -> Result<MockResource> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SluiceError::Connection("refused".into()));
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockResource {
            id,
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    fn validate(&self, resource: &MockResource) -> bool {
        resource.healthy.load(Ordering::SeqCst)
    }

    fn destroy(&self, _resource: MockResource) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

type MockPool = ResourcePool<Arc<MockFactory>>;

fn pool_with(capacity: usize, max_wait_ms: u64) -> (Arc<MockPool>, Arc<MockFactory>) {
    let factory = Arc::new(MockFactory::default());
    let config = PoolConfig::new(capacity).with_max_wait_ms(max_wait_ms);
    (Arc::new(ResourcePool::new(config, factory.clone())), factory)
}

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_creation() {
    let config = PoolConfig::new(4);
    assert_eq!(config.capacity(), 4);
    assert_eq!(config.max_wait(), Duration::from_millis(30_000));
    assert_eq!(config.idle_timeout(), Duration::from_millis(600_000));
    assert_eq!(config.statement_cache_size(), 0);
}

#[test]
fn test_pool_config_builders() {
    let config = PoolConfig::new(1)
        .with_capacity(6)
        .with_max_wait_ms(250)
        .with_idle_timeout_ms(60_000)
        .with_statement_cache_size(32);

    assert_eq!(config.capacity(), 6);
    assert_eq!(config.max_wait(), Duration::from_millis(250));
    assert_eq!(config.idle_timeout(), Duration::from_millis(60_000));
    assert_eq!(config.statement_cache_size(), 32);
}

#[test]
#[should_panic(expected = "capacity must be greater than 0")]
fn test_pool_config_zero_capacity_panics() {
    PoolConfig::new(0);
}

#[test]
fn test_pool_config_serialization_fills_defaults() {
    let config: PoolConfig =
        serde_json::from_str(r#"{"capacity": 3, "statement_cache_size": 8}"#).expect("deserialize");
    assert_eq!(config.capacity(), 3);
    assert_eq!(config.statement_cache_size(), 8);
    assert_eq!(config.max_wait(), PoolConfig::default().max_wait());

    let json = serde_json::to_string(&config).expect("serialize");
    let back: PoolConfig = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, config);
}

#[test]
fn test_pool_config_validate_rejects_zero_capacity() {
    let config: PoolConfig = serde_json::from_str(r#"{"capacity": 0}"#).expect("deserialize");
    assert!(matches!(config.validate(), Err(SluiceError::Configuration(_))));
    assert!(PoolConfig::default().validate().is_ok());
}

// =============================================================================
// PoolStats tests
// =============================================================================

#[test]
fn test_pool_stats_utilization() {
    let stats = PoolStats::new(10, 5, 5, 0);
    assert!((stats.utilization() - 0.5).abs() < 0.001);
    assert!((PoolStats::default().utilization() - 0.0).abs() < 0.001);
}

#[test]
fn test_pool_stats_is_full() {
    assert!(PoolStats::new(4, 0, 4, 2).is_full());
    assert!(!PoolStats::new(4, 1, 3, 0).is_full());
    assert!(!PoolStats::default().is_full());
}

// =============================================================================
// ResourcePool tests
// =============================================================================

#[test]
fn test_acquire_creates_then_reuses() {
    let (pool, factory) = pool_with(3, 100);
    assert_eq!(pool.capacity(), 3);

    let first = pool.acquire().expect("acquire");
    assert_eq!(pool.stats(), PoolStats::new(1, 0, 1, 0));
    let first_id = first.id;
    pool.release(first);
    assert_eq!(pool.stats(), PoolStats::new(1, 1, 0, 0));

    let again = pool.acquire().expect("acquire");
    assert_eq!(again.id, first_id);
    assert_eq!(factory.created(), 1);
    pool.release(again);
}

#[test]
fn test_capacity_exhaustion_times_out() {
    let (pool, _factory) = pool_with(2, 100);

    let a = pool.acquire().expect("acquire 1");
    let b = pool.acquire().expect("acquire 2");
    assert_eq!(pool.stats().active(), 2);

    let started = Instant::now();
    let err = pool.acquire().unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, SluiceError::ResourceExhausted(_)));
    assert!(err.is_recoverable());
    assert!(waited >= Duration::from_millis(90), "returned too early: {:?}", waited);
    assert!(waited < Duration::from_secs(2), "waited too long: {:?}", waited);

    pool.release(a);
    pool.release(b);
}

#[test]
fn test_blocked_acquire_receives_released_resource() {
    let (pool, factory) = pool_with(1, 1_000);
    let held = pool.acquire().expect("acquire");
    let held_id = held.id;

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            tx.send(()).expect("signal");
            let resource = pool.acquire().expect("acquire after release");
            let id = resource.id;
            pool.release(resource);
            id
        })
    };

    rx.recv().expect("waiter started");
    thread::sleep(Duration::from_millis(10));
    pool.release(held);

    assert_eq!(waiter.join().expect("join"), held_id);
    assert_eq!(factory.created(), 1);
}

#[test]
fn test_invalid_idle_resource_is_replaced() {
    let (pool, factory) = pool_with(1, 100);

    let resource = pool.acquire().expect("acquire");
    let old_id = resource.id;
    resource.healthy.store(false, Ordering::SeqCst);
    pool.release(resource);

    let fresh = pool.acquire().expect("acquire");
    assert_ne!(fresh.id, old_id);
    assert!(fresh.healthy.load(Ordering::SeqCst));
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().total(), 1);
    pool.release(fresh);
}

#[test]
fn test_failed_create_returns_slot() {
    let (pool, factory) = pool_with(1, 50);
    factory.fail_create.store(true, Ordering::SeqCst);

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, SluiceError::Connection(_)));
    assert_eq!(pool.stats().active(), 0);

    factory.fail_create.store(false, Ordering::SeqCst);
    let resource = pool.acquire().expect("slot was given back");
    pool.release(resource);
}

#[test]
fn test_close_rejects_acquire_and_destroys_idle() {
    let (pool, factory) = pool_with(2, 100);
    let a = pool.acquire().expect("acquire");
    let b = pool.acquire().expect("acquire");
    pool.release(a);
    pool.release(b);

    pool.close().expect("close");
    assert!(pool.is_closed());
    assert_eq!(factory.destroyed(), 2);
    assert!(matches!(pool.acquire(), Err(SluiceError::PoolClosed)));
}

#[test]
fn test_close_waits_for_outstanding_release() {
    let (pool, factory) = pool_with(1, 1_000);
    let held = pool.acquire().expect("acquire");

    let releaser = {
        let pool = pool.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            pool.release(held);
        })
    };

    pool.close().expect("close drains");
    releaser.join().expect("join");
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().total(), 0);
}

#[test]
fn test_close_timeout_reports_but_still_destroys_idle() {
    let (pool, factory) = pool_with(2, 50);
    let held = pool.acquire().expect("acquire");
    let idle = pool.acquire().expect("acquire");
    pool.release(idle);

    let err = pool.close().unwrap_err();
    assert!(matches!(err, SluiceError::ShutdownTimeout { outstanding: 1 }));
    assert_eq!(factory.destroyed(), 1);

    // Late release after close destroys instead of pooling
    pool.release(held);
    assert_eq!(factory.destroyed(), 2);
    assert_eq!(pool.stats().idle(), 0);
}

#[test]
fn test_close_wakes_waiters() {
    let (pool, _factory) = pool_with(1, 5_000);
    let held = pool.acquire().expect("acquire");

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|r| r.id))
    };

    thread::sleep(Duration::from_millis(20));
    let closer = {
        let pool = pool.clone();
        thread::spawn(move || pool.close())
    };

    let started = Instant::now();
    let result = waiter.join().expect("join waiter");
    assert!(matches!(result, Err(SluiceError::PoolClosed)));
    assert!(started.elapsed() < Duration::from_secs(2));

    pool.release(held);
    closer.join().expect("join closer").expect("close");
}

#[test]
fn test_clear_idle_leaves_borrowed_alone() {
    let (pool, factory) = pool_with(3, 100);
    let a = pool.acquire().expect("acquire");
    let b = pool.acquire().expect("acquire");
    let c = pool.acquire().expect("acquire");
    pool.release(a);
    pool.release(b);

    assert_eq!(pool.clear_idle(), 2);
    assert_eq!(factory.destroyed(), 2);
    assert_eq!(pool.stats(), PoolStats::new(1, 0, 1, 0));
    pool.release(c);
}

#[test]
fn test_discard_frees_slot() {
    let (pool, factory) = pool_with(1, 50);
    let resource = pool.acquire().expect("acquire");
    pool.discard(resource);
    assert_eq!(factory.destroyed(), 1);
    assert_eq!(pool.stats().total(), 0);
    let again = pool.acquire().expect("slot available");
    pool.release(again);
}

#[test]
fn test_concurrent_in_use_never_exceeds_capacity() {
    const CAPACITY: usize = 3;
    const THREADS: usize = 12;
    const ROUNDS: usize = 25;

    let (pool, factory) = pool_with(CAPACITY, 2_000);
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let peak = peak.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let resource = pool.acquire().expect("acquire under contention");
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(200));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                    pool.release(resource);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker");
    }

    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
    assert!(factory.created() <= CAPACITY);
    let stats = pool.stats();
    assert_eq!(stats.active(), 0);
    assert!(stats.total() <= CAPACITY);
}
