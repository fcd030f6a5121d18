//! The shared "ready" flag.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide boolean mutated only through [`ReadyState::toggle`].
///
/// The value is derived from the parity of a single toggle counter, so a
/// flip and the read of its result are one atomic step and concurrent
/// toggles can never collapse into one.
#[derive(Debug, Default)]
pub struct ReadyState {
    initial: bool,
    toggles: AtomicU64,
}

impl ReadyState {
    pub fn new(initial: bool) -> Self {
        Self {
            initial,
            toggles: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> bool {
        self.value_after(self.toggles.load(Ordering::Acquire))
    }

    /// Flips the flag and returns the new value.
    pub fn toggle(&self) -> bool {
        let count = self.toggles.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.value_after(count)
    }

    /// Number of toggles applied since creation (modulo 2^64).
    pub fn toggle_count(&self) -> u64 {
        self.toggles.load(Ordering::Acquire)
    }

    fn value_after(&self, count: u64) -> bool {
        self.initial ^ (count & 1 == 1)
    }
}
