//! Addresses packed together with a 16-bit tag into a single machine word.
//!
//! All pooled blocks are allocated below 2^48, so the upper 16 bits of a `u64`
//! are free to carry an epoch or ABA counter.
//! This allows (address, tag) pairs to be updated with a single-word
//! *compare-and-swap*.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The number of bits available for the address part.
pub(crate) const ADDR_BITS: u32 = 48;
/// The mask for the address part.
pub(crate) const ADDR_MASK: u64 = (1 << ADDR_BITS) - 1;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Tagged
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An address (or small sentinel value) combined with a 16-bit tag.
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq)]
pub(crate) struct Tagged(u64);

/********** impl inherent *************************************************************************/

impl Tagged {
    /// Creates a new [`Tagged`] value from `addr` and `tag`.
    #[inline]
    pub fn new(addr: usize, tag: u16) -> Self {
        debug_assert_eq!(addr as u64 & !ADDR_MASK, 0, "address exceeds 48 bits");
        Self((u64::from(tag) << ADDR_BITS) | (addr as u64 & ADDR_MASK))
    }

    /// Creates a new [`Tagged`] value from a pointer and `tag`.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T, tag: u16) -> Self {
        Self::new(ptr as usize, tag)
    }

    /// Returns the address part.
    #[inline]
    pub fn addr(self) -> usize {
        (self.0 & ADDR_MASK) as usize
    }

    /// Returns the address part cast to a pointer.
    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.addr() as *mut T
    }

    /// Returns the tag part.
    #[inline]
    pub fn tag(self) -> u16 {
        (self.0 >> ADDR_BITS) as u16
    }

    /// Returns `true` if the address part is null.
    #[inline]
    pub fn is_null(self) -> bool {
        self.addr() == 0
    }

    #[inline]
    fn into_raw(self) -> u64 {
        self.0
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for Tagged {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Tagged")
            .field("addr", &(self.addr() as *const ()))
            .field("tag", &self.tag())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AtomicTagged
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An atomic [`Tagged`] value.
#[derive(Default)]
pub(crate) struct AtomicTagged(AtomicU64);

/********** impl inherent *************************************************************************/

impl AtomicTagged {
    /// Creates a new [`AtomicTagged`].
    #[inline]
    pub fn new(tagged: Tagged) -> Self {
        Self(AtomicU64::new(tagged.into_raw()))
    }

    /// Creates a new [`AtomicTagged`] set to null with a zero tag.
    #[inline]
    pub const fn null() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> Tagged {
        Tagged(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, tagged: Tagged, order: Ordering) {
        self.0.store(tagged.into_raw(), order);
    }

    /// Stores `new` if the current value is `current` and returns the actual
    /// value on failure.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: Tagged,
        new: Tagged,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), Tagged> {
        self.0
            .compare_exchange(current.into_raw(), new.into_raw(), success, failure)
            .map(|_| ())
            .map_err(Tagged)
    }

    /// Same as `compare_exchange` but may fail spuriously.
    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: Tagged,
        new: Tagged,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), Tagged> {
        self.0
            .compare_exchange_weak(current.into_raw(), new.into_raw(), success, failure)
            .map(|_| ())
            .map_err(Tagged)
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for AtomicTagged {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}
