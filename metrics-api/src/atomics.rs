//! Atomic types used for metrics.
//!
//! Aggregation state for both integer and floating-point instruments is kept in a single 64-bit
//! atomic word, reinterpreting the bits according to the instrument's [`Numeric`] type.  We always
//! require a 64-bit atomic regardless of whether the standard library exposes one for the target
//! architecture, so `portable-atomic` fills in on 32-bit targets.

use std::{fmt, marker::PhantomData, sync::atomic::Ordering};

#[cfg(target_pointer_width = "32")]
pub use portable_atomic::AtomicU64;
#[cfg(not(target_pointer_width = "32"))]
pub use std::sync::atomic::AtomicU64;

use crate::Numeric;

/// An atomic cell holding a single `N`.
pub struct AtomicNumber<N> {
    bits: AtomicU64,
    _number: PhantomData<N>,
}

impl<N: Numeric> AtomicNumber<N> {
    /// Creates a new `AtomicNumber` holding `value`.
    pub fn new(value: N) -> Self {
        Self { bits: AtomicU64::new(value.to_bits()), _number: PhantomData }
    }

    /// Loads the current value.
    pub fn load(&self) -> N {
        N::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Stores `value`, discarding the current value.
    pub fn store(&self, value: N) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// Stores `value`, returning the previous value.
    pub fn swap(&self, value: N) -> N {
        N::from_bits(self.bits.swap(value.to_bits(), Ordering::AcqRel))
    }

    /// Adds `value` to the current value.
    pub fn add(&self, value: N) {
        N::fetch_add(&self.bits, value);
    }

    /// Subtracts `value` from the current value.
    pub fn sub(&self, value: N) {
        N::fetch_sub(&self.bits, value);
    }
}

impl<N: Numeric> Default for AtomicNumber<N> {
    fn default() -> Self {
        Self::new(N::zero())
    }
}

impl<N: Numeric> fmt::Debug for AtomicNumber<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicNumber").field(&self.load()).finish()
    }
}
