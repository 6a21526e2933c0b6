//! A lock-free intrusive stack over pooled blocks.
//!
//! The stack links blocks through the `next` field of their [`BlockHeader`]
//! and tags its head with a counter that is advanced by every successful
//! update, so that a *pop* racing with a *pop* and a *push* of the same block
//! (ABA) is always detected.
//! Since pooled blocks are never returned to the global allocator, reading the
//! `next` field of a block that has concurrently been popped is always safe,
//! the stale value is simply rejected by the tagged *compare-and-swap*.

use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use crate::free_list::BlockHeader;
use crate::tagged::{AtomicTagged, Tagged};

////////////////////////////////////////////////////////////////////////////////////////////////////
// TaggedStack
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A concurrent linked-list based stack of [`BlockHeader`]s.
#[derive(Debug, Default)]
pub(crate) struct TaggedStack {
    head: AtomicTagged,
}

/********** impl inherent *************************************************************************/

impl TaggedStack {
    /// Creates a new empty [`TaggedStack`].
    #[inline]
    pub const fn new() -> Self {
        Self { head: AtomicTagged::null() }
    }

    /// Pushes `block` to the top of the stack.
    ///
    /// # Safety
    ///
    /// `block` must be valid and must not be contained in any stack or be
    /// otherwise shared.
    #[inline]
    pub unsafe fn push(&self, block: NonNull<BlockHeader>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            block.as_ref().next.store(head.as_ptr(), Ordering::Relaxed);
            let new = Tagged::from_ptr(block.as_ptr(), head.tag().wrapping_add(1));

            // (STK:1) this `Release` CAS synchronizes-with the `Acquire` loads in (STK:2) and
            // (STK:3)
            match self.head.compare_exchange_weak(head, new, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Pops the top block off the stack.
    ///
    /// The returned block is exclusively owned by the caller.
    #[inline]
    pub fn pop(&self) -> Option<NonNull<BlockHeader>> {
        // (STK:2) this `Acquire` load synchronizes-with the `Release` CAS in (STK:1)
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let top = NonNull::new(head.as_ptr::<BlockHeader>())?;
            // the block may have been popped and re-pushed in the meantime, in which case the
            // read value is stale but the tag will have been advanced
            let next = unsafe { top.as_ref().next.load(Ordering::Relaxed) };
            let new = Tagged::from_ptr(next, head.tag().wrapping_add(1));

            // (STK:3) this `Acquire` CAS synchronizes-with the `Release` CAS in (STK:1)
            match self.head.compare_exchange_weak(head, new, Ordering::Acquire, Ordering::Acquire) {
                Ok(_) => {
                    unsafe { top.as_ref().next.store(ptr::null_mut(), Ordering::Relaxed) };
                    return Some(top);
                }
                Err(actual) => head = actual,
            }
        }
    }
}
