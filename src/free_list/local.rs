//! The thread-local tier of the free lists.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;

use arrayvec::{ArrayVec, CapacityError};
use log::debug;

use crate::config;

use super::global::GLOBAL;
use super::BlockHeader;

include!(concat!(env!("OUT_DIR"), "/build_constants.rs"));

/// Pools with a local tier: the segments and the node classes up to 4096 bytes.
const LOCAL_POOLS: usize = 1 + 8;

thread_local!(static LOCAL: Local = Local::new());

/// Pops a block from the calling thread's cache for `pool`.
#[inline]
pub(super) fn try_acquire(pool: usize) -> Option<NonNull<BlockHeader>> {
    if pool >= LOCAL_POOLS {
        return None;
    }

    LOCAL.try_with(|local| local.acquire(pool)).ok().flatten()
}

/// Pushes `block` to the calling thread's cache for `pool`.
///
/// # Safety
///
/// `block` must be a block of `pool` that is not shared with anyone else.
#[inline]
pub(super) unsafe fn try_release(pool: usize, block: NonNull<BlockHeader>) -> Result<(), ReleaseError> {
    if pool >= LOCAL_POOLS {
        return Err(ReleaseError::Capacity);
    }

    LOCAL.try_with(|local| local.release(pool, block)).map_err(|_| ReleaseError::Access)?
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Local
////////////////////////////////////////////////////////////////////////////////////////////////////

struct Local(UnsafeCell<LocalInner>);

/********** impl inherent *************************************************************************/

impl Local {
    #[inline]
    fn new() -> Self {
        let limit = config::current().local_free_list().min(LOCAL_CAPACITY);
        Self(UnsafeCell::new(LocalInner { limit, pools: Default::default() }))
    }

    #[inline]
    fn acquire(&self, pool: usize) -> Option<NonNull<BlockHeader>> {
        // safety: the cell is only accessed through these non-reentrant methods
        let inner = unsafe { &mut *self.0.get() };
        inner.pools[pool].pop()
    }

    #[inline]
    fn release(&self, pool: usize, block: NonNull<BlockHeader>) -> Result<(), ReleaseError> {
        let inner = unsafe { &mut *self.0.get() };
        let cache = &mut inner.pools[pool];
        if cache.len() >= inner.limit {
            return Err(ReleaseError::Capacity);
        }

        cache.try_push(block)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// LocalInner
////////////////////////////////////////////////////////////////////////////////////////////////////

struct LocalInner {
    limit: usize,
    pools: [ArrayVec<NonNull<BlockHeader>, LOCAL_CAPACITY>; LOCAL_POOLS],
}

/********** impl Drop *****************************************************************************/

impl Drop for LocalInner {
    #[inline]
    fn drop(&mut self) {
        let mut drained = 0;
        for (pool, cache) in self.pools.iter_mut().enumerate() {
            drained += cache.len();
            // safety: all cached blocks are exclusively owned by this thread
            unsafe { GLOBAL.release_all(pool, cache.drain(..)) };
        }

        if drained > 0 {
            debug!("drained {} cached blocks of exiting thread into global free lists", drained);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ReleaseError
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Error type for thread local release operations.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum ReleaseError {
    Access,
    Capacity,
}

/********** impl From *****************************************************************************/

impl From<CapacityError<NonNull<BlockHeader>>> for ReleaseError {
    #[inline]
    fn from(_: CapacityError<NonNull<BlockHeader>>) -> Self {
        ReleaseError::Capacity
    }
}

/********** impl Display **************************************************************************/

impl fmt::Display for ReleaseError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ReleaseError::{Access, Capacity};
        match *self {
            Access => write!(f, "failed to access already destroyed thread local storage"),
            Capacity => write!(f, "thread local free list already full"),
        }
    }
}
