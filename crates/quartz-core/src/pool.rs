//! Bounded resource pool.
//!
//! Holds reusable resources — in this crate, engine iterators — behind
//! a capacity limit. `get` blocks while every slot is in use,
//! `try_get` does not. Capacity can be resized at runtime; shrinking
//! waits for outstanding resources to come home. Idle resources past
//! the idle timeout are closed on the next acquisition and replaced
//! from the factory.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Something the pool can hand out and later dispose of.
pub trait PoolResource: Send {
    /// Releases whatever the resource holds. Called when the resource
    /// ages out, the pool shrinks, or the pool closes.
    fn close(&mut self);
}

impl PoolResource for Box<dyn crate::engine::StoreIterator> {
    fn close(&mut self) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,

    #[error("capacity {0} out of range (0, {1}]")]
    InvalidCapacity(usize, usize),

    #[error("resource factory failed: {0}")]
    Factory(String),
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub max_capacity: usize,
    pub wait_count: u64,
    pub wait_time: Duration,
    pub idle_timeout: Duration,
}

struct Idle<R> {
    resource: R,
    since: Instant,
}

struct Inner<R> {
    idle: VecDeque<Idle<R>>,
    capacity: usize,
    in_use: usize,
    closed: bool,
}

/// Bounded pool of `R` resources created by a user factory.
pub struct Pool<R: PoolResource> {
    factory: Box<dyn Fn() -> Result<R, String> + Send + Sync>,
    inner: Mutex<Inner<R>>,
    returned: Condvar,
    max_capacity: usize,
    idle_timeout: Duration,
    // counters readable without the lock
    capacity_now: AtomicU64,
    in_use_now: AtomicU64,
    wait_count: AtomicU64,
    wait_nanos: AtomicU64,
}

impl<R: PoolResource> Pool<R> {
    /// Creates a pool with `capacity` slots (growable up to
    /// `max_capacity`). Panics if `capacity` is zero or exceeds
    /// `max_capacity`.
    pub fn new(
        factory: impl Fn() -> Result<R, String> + Send + Sync + 'static,
        capacity: usize,
        max_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        assert!(
            capacity > 0 && capacity <= max_capacity,
            "capacity {capacity} out of range (0, {max_capacity}]"
        );
        let pool = Self {
            factory: Box::new(factory),
            inner: Mutex::new(Inner {
                idle: VecDeque::new(),
                capacity,
                in_use: 0,
                closed: false,
            }),
            returned: Condvar::new(),
            max_capacity,
            idle_timeout,
            capacity_now: AtomicU64::new(capacity as u64),
            in_use_now: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
            wait_nanos: AtomicU64::new(0),
        };
        pool
    }

    /// Takes a resource, blocking while `in_use == capacity`.
    pub fn get(&self) -> Result<R, PoolError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PoolError::Closed);
            }
            if let Some(r) = self.take_locked(&mut inner)? {
                return Ok(r);
            }
            let waited = Instant::now();
            self.wait_count.fetch_add(1, Ordering::Relaxed);
            self.returned.wait(&mut inner);
            self.wait_nanos
                .fetch_add(waited.elapsed().as_nanos() as u64, Ordering::Relaxed);
        }
    }

    /// Non-blocking variant of [`Pool::get`]: returns `Ok(None)` when
    /// the pool is exhausted.
    pub fn try_get(&self) -> Result<Option<R>, PoolError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PoolError::Closed);
        }
        self.take_locked(&mut inner)
    }

    /// Grabs an idle resource (replacing it if it idled out) or
    /// creates one if a slot is free. `Ok(None)` means exhausted.
    fn take_locked(&self, inner: &mut Inner<R>) -> Result<Option<R>, PoolError> {
        while let Some(mut idle) = inner.idle.pop_front() {
            if idle.since.elapsed() >= self.idle_timeout {
                idle.resource.close();
                continue;
            }
            inner.in_use += 1;
            self.in_use_now.store(inner.in_use as u64, Ordering::Relaxed);
            return Ok(Some(idle.resource));
        }
        if inner.in_use < inner.capacity {
            let r = (self.factory)().map_err(PoolError::Factory)?;
            inner.in_use += 1;
            self.in_use_now.store(inner.in_use as u64, Ordering::Relaxed);
            return Ok(Some(r));
        }
        Ok(None)
    }

    /// Returns a resource. `None` means the resource was closed
    /// externally: the slot is freed without anything going back on
    /// the idle list.
    pub fn put(&self, resource: Option<R>) {
        let mut inner = self.inner.lock();
        inner.in_use = inner.in_use.saturating_sub(1);
        self.in_use_now.store(inner.in_use as u64, Ordering::Relaxed);

        if let Some(mut r) = resource {
            // drop the resource instead of pooling it when the pool is
            // closed or has shrunk below the outstanding count
            if inner.closed || inner.idle.len() + inner.in_use >= inner.capacity {
                r.close();
            } else {
                inner.idle.push_back(Idle {
                    resource: r,
                    since: Instant::now(),
                });
            }
        }
        self.returned.notify_all();
    }

    /// Resizes the pool. Shrinking blocks until enough resources have
    /// been returned to fit the new capacity.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), PoolError> {
        if capacity == 0 || capacity > self.max_capacity {
            return Err(PoolError::InvalidCapacity(capacity, self.max_capacity));
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PoolError::Closed);
        }
        inner.capacity = capacity;
        self.capacity_now.store(capacity as u64, Ordering::Relaxed);

        loop {
            // close idle resources until we fit
            while inner.idle.len() + inner.in_use > capacity {
                match inner.idle.pop_back() {
                    Some(mut idle) => idle.resource.close(),
                    None => break,
                }
            }
            if inner.in_use <= capacity {
                break;
            }
            self.returned.wait(&mut inner);
        }
        self.returned.notify_all();
        Ok(())
    }

    /// Closes every pooled resource and fails all future `get`s.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.capacity = 0;
        self.capacity_now.store(0, Ordering::Relaxed);
        while let Some(mut idle) = inner.idle.pop_front() {
            idle.resource.close();
        }
        self.returned.notify_all();
    }

    /// Counter snapshot; no lock taken.
    pub fn stats(&self) -> PoolStats {
        let capacity = self.capacity_now.load(Ordering::Relaxed) as usize;
        let in_use = self.in_use_now.load(Ordering::Relaxed) as usize;
        PoolStats {
            capacity,
            available: capacity.saturating_sub(in_use),
            max_capacity: self.max_capacity,
            wait_count: self.wait_count.load(Ordering::Relaxed),
            wait_time: Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed)),
            idle_timeout: self.idle_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    struct TestResource {
        live: Arc<AtomicI64>,
        closed: bool,
    }

    impl PoolResource for TestResource {
        fn close(&mut self) {
            if !self.closed {
                self.live.fetch_sub(1, Ordering::SeqCst);
                self.closed = true;
            }
        }
    }

    fn test_pool(
        capacity: usize,
        max: usize,
        idle: Duration,
    ) -> (Arc<Pool<TestResource>>, Arc<AtomicI64>) {
        let live = Arc::new(AtomicI64::new(0));
        let live2 = Arc::clone(&live);
        let pool = Pool::new(
            move || {
                live2.fetch_add(1, Ordering::SeqCst);
                Ok(TestResource {
                    live: Arc::clone(&live2),
                    closed: false,
                })
            },
            capacity,
            max,
            idle,
        );
        (Arc::new(pool), live)
    }

    #[test]
    fn get_creates_up_to_capacity() {
        let (pool, live) = test_pool(5, 6, Duration::from_secs(1));
        let mut held = Vec::new();
        for i in 0..5 {
            held.push(pool.get().unwrap());
            let stats = pool.stats();
            assert_eq!(stats.available, 5 - i - 1);
            assert_eq!(stats.wait_count, 0);
        }
        assert_eq!(live.load(Ordering::SeqCst), 5);

        // exhausted: try_get yields None instead of blocking
        assert!(pool.try_get().unwrap().is_none());

        for r in held {
            pool.put(Some(r));
        }
        assert_eq!(pool.stats().available, 5);

        // subsequent gets reuse idle resources, no new creations
        let r = pool.try_get().unwrap().unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 5);
        pool.put(Some(r));
    }

    #[test]
    fn get_blocks_until_put() {
        let (pool, _) = test_pool(1, 1, Duration::from_secs(10));
        let r = pool.get().unwrap();

        let p2 = Arc::clone(&pool);
        let waiter = std::thread::spawn(move || {
            let r = p2.get().unwrap();
            p2.put(Some(r));
        });

        std::thread::sleep(Duration::from_millis(20));
        pool.put(Some(r));
        waiter.join().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.wait_count, 1);
        assert!(stats.wait_time > Duration::ZERO);
    }

    #[test]
    fn put_none_frees_slot() {
        let (pool, live) = test_pool(1, 1, Duration::from_secs(10));
        let mut r = pool.get().unwrap();
        // resource closed externally
        r.close();
        drop(r);
        pool.put(None);
        assert_eq!(live.load(Ordering::SeqCst), 0);

        // slot is free again
        let r = pool.try_get().unwrap().unwrap();
        pool.put(Some(r));
    }

    #[test]
    fn shrink_closes_idle() {
        let (pool, live) = test_pool(6, 6, Duration::from_secs(10));
        let held: Vec<_> = (0..6).map(|_| pool.get().unwrap()).collect();
        for r in held {
            pool.put(Some(r));
        }
        assert_eq!(live.load(Ordering::SeqCst), 6);

        pool.set_capacity(3).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 3);
        let stats = pool.stats();
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.available, 3);

        // grow back
        pool.set_capacity(6).unwrap();
        assert_eq!(pool.stats().capacity, 6);
    }

    #[test]
    fn shrink_waits_for_outstanding() {
        let (pool, _) = test_pool(2, 2, Duration::from_secs(10));
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();

        let p2 = Arc::clone(&pool);
        let shrinker = std::thread::spawn(move || {
            p2.set_capacity(1).unwrap();
        });

        std::thread::sleep(Duration::from_millis(20));
        pool.put(Some(a));
        pool.put(Some(b));
        shrinker.join().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.capacity, 1);
        assert!(stats.available <= 1);
    }

    #[test]
    fn capacity_bounds_enforced() {
        let (pool, _) = test_pool(2, 4, Duration::from_secs(1));
        assert_eq!(
            pool.set_capacity(0),
            Err(PoolError::InvalidCapacity(0, 4))
        );
        assert_eq!(
            pool.set_capacity(5),
            Err(PoolError::InvalidCapacity(5, 4))
        );
        pool.set_capacity(4).unwrap();
    }

    #[test]
    fn idle_resources_are_replaced() {
        let (pool, live) = test_pool(1, 1, Duration::from_millis(10));
        let r = pool.get().unwrap();
        pool.put(Some(r));
        assert_eq!(live.load(Ordering::SeqCst), 1);

        std::thread::sleep(Duration::from_millis(25));

        // the idle resource aged out: closed and replaced by a new one
        let r = pool.get().unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        pool.put(Some(r));
    }

    #[test]
    fn close_drains_everything() {
        let (pool, live) = test_pool(3, 3, Duration::from_secs(10));
        let r = pool.get().unwrap();
        pool.put(Some(r));
        pool.close();

        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().capacity, 0);
        assert!(matches!(pool.get(), Err(PoolError::Closed)));
        assert!(matches!(pool.try_get(), Err(PoolError::Closed)));
        assert_eq!(pool.set_capacity(2), Err(PoolError::Closed));
    }
}
