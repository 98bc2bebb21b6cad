//! The process-wide serial clock.
//!
//! Every mutation tick of the store and every connection event draws a value
//! from the same clock. Values are never reused, so any two observations can be
//! compared for staleness without knowing which component produced them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A version number drawn from a [`SerialClock`].
pub type Serial = u64;

/// Shared monotonically increasing counter.
///
/// Cloning a clock yields a handle to the same counter. The clock is injected
/// at construction into the store and the protocol connection instead of
/// living in a global.
#[derive(Debug, Clone, Default)]
pub struct SerialClock(Arc<AtomicU64>);

impl SerialClock {
    /// Create a clock starting at zero. The first [`next`](Self::next) returns 1.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Advance the clock and return the new value.
    pub fn next(&self) -> Serial {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The last value handed out (0 if none yet).
    pub fn current(&self) -> Serial {
        self.0.load(Ordering::Acquire)
    }

    /// Reset to zero. Only meaningful between independent test cases.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}
