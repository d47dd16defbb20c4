//! Bounded handoff between the producing channel and the presentation thread.
//!
//! Pushes never block: a full queue rejects the incoming item and gives it
//! back to the caller. Items already queued are never evicted.

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub struct OutputQueue<T> {
    items: ArrayQueue<T>,
    aborted: AtomicBool,
    lock: Mutex<()>,
    ready: Condvar,
}

impl<T> OutputQueue<T> {
    /// A queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity.max(1)),
            aborted: AtomicBool::new(false),
            lock: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

    /// Offer an item. A full or aborted queue hands it straight back.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        if self.is_aborted() {
            return Err(item);
        }
        self.items.push(item)?;

        let _guard = self.lock.lock();
        self.ready.notify_one();
        Ok(())
    }

    /// Take the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        if self.is_aborted() {
            return None;
        }
        self.items.pop()
    }

    /// Wait up to `timeout` for an item. Returns early with `None` on abort.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_aborted() {
                return None;
            }

            let mut guard = self.lock.lock();
            if self.items.is_empty() && !self.is_aborted() {
                if self.ready.wait_until(&mut guard, deadline).timed_out() {
                    drop(guard);
                    return self.try_pop();
                }
            }
        }
    }

    /// Wake every waiter and refuse all further traffic.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.ready.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

impl<T> std::fmt::Debug for OutputQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
