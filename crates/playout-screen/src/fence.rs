//! Completion markers for presentation uploads.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marker for a batch of GPU work. Polled, never waited on.
pub trait Fence: Send {
    fn is_signaled(&self) -> bool;
}

/// A fence whose work already completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignaledFence;

impl Fence for SignaledFence {
    fn is_signaled(&self) -> bool {
        true
    }
}

/// A fence signaled by hand. Clones share the same flag.
#[derive(Clone, Default)]
pub struct ManualFence {
    signaled: Arc<AtomicBool>,
}

impl ManualFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}

impl Fence for ManualFence {
    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ManualFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualFence")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}
