//! The process-wide tier of the free lists.
//!
//! Unlike every other container in this crate, the global free lists are
//! never torn down and the blocks they hold are never destroyed, not even at
//! process exit.
//! This is deliberate: stale pointers into pooled blocks must stay readable
//! for as long as any thread may still dereference them, and statics are
//! never dropped anyway.
//! The memory is reclaimed by the operating system when the process exits.

use std::ptr::NonNull;

use crate::stack::TaggedStack;

use super::{BlockHeader, POOLS};

/// The global free lists, which are never torn down.
pub(super) static GLOBAL: Global = Global::new();

////////////////////////////////////////////////////////////////////////////////////////////////////
// Global
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One lock-free stack of free blocks per pool.
#[derive(Debug)]
pub(super) struct Global {
    pools: [TaggedStack; POOLS],
}

/********** impl inherent *************************************************************************/

impl Global {
    #[inline]
    const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: TaggedStack = TaggedStack::new();
        Self { pools: [EMPTY; POOLS] }
    }

    /// Pops a free block from `pool`, if there is one.
    #[inline]
    pub fn acquire(&self, pool: usize) -> Option<NonNull<BlockHeader>> {
        self.pools[pool].pop()
    }

    /// Pushes `block` to `pool`.
    ///
    /// # Safety
    ///
    /// `block` must be a block of `pool` that is not shared with anyone else.
    #[inline]
    pub unsafe fn release(&self, pool: usize, block: NonNull<BlockHeader>) {
        self.pools[pool].push(block);
    }

    /// Pushes all `blocks` to `pool`.
    ///
    /// # Safety
    ///
    /// See [`release`][Global::release].
    #[inline]
    pub unsafe fn release_all(
        &self,
        pool: usize,
        blocks: impl IntoIterator<Item = NonNull<BlockHeader>>,
    ) {
        for block in blocks {
            self.release(pool, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::sync::atomic::Ordering;

    use crate::free_list::{BlockHeader, POOLS};

    use super::GLOBAL;

    #[test]
    fn released_blocks_stay_intact() {
        // the largest size class can never be allocated, so no other test touches its pool
        const POOL: usize = POOLS - 1;

        let block = NonNull::from(Box::leak(Box::new(BlockHeader::new())));
        unsafe { block.as_ref() }.epoch.store(5, Ordering::Relaxed);
        unsafe { GLOBAL.release(POOL, block) };

        let again = GLOBAL.acquire(POOL).unwrap();
        assert_eq!(again, block);
        assert_eq!(unsafe { again.as_ref() }.epoch.load(Ordering::Relaxed), 5);
        assert!(GLOBAL.acquire(POOL).is_none());

        unsafe { drop(Box::from_raw(block.as_ptr())) };
    }
}
