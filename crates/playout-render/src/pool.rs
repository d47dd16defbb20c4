//! Reusable frame storage.
//!
//! [`FramePool::acquire`] hands out a [`PoolLease`], a unique and writable
//! handle. Freezing it with [`PoolLease::share`] gives a cheap-to-clone,
//! read-only [`Shared`] handle. Whenever the last handle goes away the
//! storage is pushed back onto the pool through [`Recycle`] instead of
//! being freed.
//!
//! The free list is a lock-free MPMC queue, so storage can be recycled from
//! the render thread and the presentation thread at the same time.

use crossbeam::queue::SegQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use playout_core::PlayoutResult;

/// Return path for storage whose last handle was released.
pub trait Recycle<T>: Send + Sync {
    fn recycle(&self, item: T);
}

/// Counters describing a pool's storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Distinct storage objects ever created (pool misses).
    pub created: usize,
    /// Storage currently held by live handles.
    pub outstanding: usize,
    /// Storage sitting in the pool, ready for reuse.
    pub available: usize,
    /// Highest `outstanding` value observed.
    pub high_water: usize,
}

type Factory<T> = Box<dyn Fn() -> PlayoutResult<T> + Send + Sync>;

struct PoolShared<T> {
    label: &'static str,
    free: SegQueue<T>,
    factory: Factory<T>,
    created: AtomicUsize,
    outstanding: AtomicUsize,
    high_water: AtomicUsize,
}

impl<T: Send> Recycle<T> for PoolShared<T> {
    fn recycle(&self, item: T) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.free.push(item);
    }
}

/// Pool of reusable storage. Cloning the pool clones a reference to the
/// same free list.
pub struct FramePool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for FramePool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> FramePool<T> {
    /// Create an empty pool. `factory` runs on every pool miss.
    pub fn new<F>(label: &'static str, factory: F) -> Self
    where
        F: Fn() -> PlayoutResult<T> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(PoolShared {
                label,
                free: SegQueue::new(),
                factory: Box::new(factory),
                created: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }),
        }
    }

    /// Take storage from the pool, creating it on a miss.
    ///
    /// A failing factory is reported as-is; the pool does not retry.
    pub fn acquire(&self) -> PlayoutResult<PoolLease<T>> {
        let shared = &self.shared;
        let item = match shared.free.pop() {
            Some(item) => item,
            None => {
                let item = (shared.factory)()?;
                let created = shared.created.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!(pool = shared.label, created, "frame pool grew");
                item
            }
        };

        let outstanding = shared.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        shared.high_water.fetch_max(outstanding, Ordering::AcqRel);

        let home: Arc<dyn Recycle<T>> = self.shared.clone();
        Ok(PoolLease {
            item: Some(item),
            home: Some(home),
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.shared.created.load(Ordering::Acquire),
            outstanding: self.shared.outstanding.load(Ordering::Acquire),
            available: self.shared.free.len(),
            high_water: self.shared.high_water.load(Ordering::Acquire),
        }
    }
}

impl<T> fmt::Debug for FramePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("label", &self.shared.label)
            .field("created", &self.shared.created.load(Ordering::Relaxed))
            .field("outstanding", &self.shared.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

/// Unique, writable handle to pooled storage.
pub struct PoolLease<T: Send + 'static> {
    item: Option<T>,
    home: Option<Arc<dyn Recycle<T>>>,
}

impl<T: Send + 'static> PoolLease<T> {
    /// Wrap storage that does not belong to any pool. It is dropped normally.
    pub fn detached(item: T) -> Self {
        Self {
            item: Some(item),
            home: None,
        }
    }

    /// Whether the storage returns to a pool on release.
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    /// Freeze into a shared, read-only handle.
    pub fn share(self) -> Shared<T> {
        Shared {
            inner: Arc::new(self),
        }
    }
}

impl<T: Send + 'static> Deref for PoolLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the item out.
        self.item.as_ref().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<T: Send + 'static> DerefMut for PoolLease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<T: Send + 'static> Drop for PoolLease<T> {
    fn drop(&mut self) {
        if let (Some(item), Some(home)) = (self.item.take(), self.home.take()) {
            home.recycle(item);
        }
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for PoolLease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolLease")
            .field("item", &self.item)
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

/// Shared, read-only handle to pooled storage.
pub struct Shared<T: Send + 'static> {
    inner: Arc<PoolLease<T>>,
}

impl<T: Send + 'static> Shared<T> {
    /// Number of live handles referencing this storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles reference the same storage.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T: Send + 'static> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&**self.inner).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_core::PlayoutError;
    use std::sync::atomic::AtomicU64;

    fn counting_pool() -> FramePool<u64> {
        let next = Arc::new(AtomicU64::new(0));
        FramePool::new("test", move || Ok(next.fetch_add(1, Ordering::Relaxed)))
    }

    #[test]
    fn test_miss_then_hit_reuses_storage() {
        let pool = counting_pool();
        let a = pool.acquire().unwrap();
        let id = *a;
        drop(a);

        let b = pool.acquire().unwrap();
        assert_eq!(*b, id);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_shared_returns_only_after_last_release() {
        let pool = counting_pool();
        let shared = pool.acquire().unwrap().share();
        let other = shared.clone();
        assert_eq!(shared.ref_count(), 2);

        drop(shared);
        assert_eq!(pool.stats().available, 0);
        assert_eq!(pool.stats().outstanding, 1);

        drop(other);
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_high_water_and_no_shrink() {
        let pool = counting_pool();
        let leases: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.stats().high_water, 5);
        drop(leases);

        let stats = pool.stats();
        assert_eq!(stats.created, 5);
        assert_eq!(stats.available, 5);
        assert_eq!(stats.high_water, 5);

        let _one = pool.acquire().unwrap();
        assert_eq!(pool.stats().created, 5);
    }

    #[test]
    fn test_factory_failure_is_reported() {
        let pool: FramePool<u64> =
            FramePool::new("failing", || Err(PlayoutError::allocation("test frame", 64)));
        let err = pool.acquire().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_detached_lease_is_not_pooled() {
        let lease = PoolLease::detached(7u64);
        assert!(!lease.is_pooled());
        assert_eq!(*lease, 7);
    }

    #[test]
    fn test_live_handles_never_exceed_created() {
        let pool = counting_pool();
        let mut live = Vec::new();
        for step in 0..64usize {
            if step % 3 == 2 {
                live.pop();
            } else {
                live.push(pool.acquire().unwrap());
            }
            let stats = pool.stats();
            assert!(stats.outstanding <= stats.created);
            assert_eq!(stats.outstanding, live.len());
        }
    }

    #[test]
    fn test_concurrent_recycle() {
        let pool = counting_pool();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let lease = pool.acquire().unwrap();
                        let shared = lease.share();
                        let copy = shared.clone();
                        drop(shared);
                        drop(copy);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.available, stats.created);
        assert!(stats.created <= 4);
    }
}
