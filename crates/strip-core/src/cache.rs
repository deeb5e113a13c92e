//! Latest-value cache for StripDAQ.
//!
//! Each slot owns one [`Sampler`]; subscription deliveries store into it and
//! the host pulls from clones of it on its own schedule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pull accessor for the most recent sample of one channel.
///
/// Clones share the same cell. A fresh cell is created for every slot
/// allocation, so a sampler kept by the host after its channel was freed can
/// never observe data from whichever channel reuses the slot.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    bits: Arc<AtomicU64>,
}

impl Sampler {
    /// Create a sampler holding `0.0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the most recently stored value.
    #[must_use]
    pub fn sample(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Store a new value.
    pub(crate) fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}
