//! The writer lock used by [`RcuVariable`][crate::RcuVariable].
//!
//! Only writers ever touch the lock, readers are never blocked by it.
//! The lock is an abstract collaborator: any primitive that can be acquired,
//! tried and released from the same execution context can be plugged in by
//! implementing [`RawLock`].
//! The default [`Futex`] parks contending writers on the lock word itself.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RawLock (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A raw mutual exclusion primitive.
///
/// # Safety
///
/// Implementors must guarantee that at most one caller holds the lock at any
/// time, that a successful `lock` or `try_lock` synchronizes-with the
/// preceding `unlock` (acquire/release semantics) and that `try_lock` never
/// blocks.
pub unsafe trait RawLock: Default + Send + Sync {
    /// Acquires the lock, suspending the caller until it is available.
    fn lock(&self);

    /// Attempts to acquire the lock without suspending and returns `true` on
    /// success.
    fn try_lock(&self) -> bool;

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The caller must currently hold the lock and must release it from the
    /// same execution context it was acquired in.
    unsafe fn unlock(&self);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Futex
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock that parks contending threads on the lock word.
pub struct Futex {
    state: AtomicU32,
}

/********** impl inherent *************************************************************************/

impl Futex {
    /// Creates a new unlocked [`Futex`].
    #[inline]
    pub const fn new() -> Self {
        Self { state: AtomicU32::new(UNLOCKED) }
    }

    /// Returns `true` if the lock is currently held by any thread.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == LOCKED
    }
}

/********** impl Default **************************************************************************/

impl Default for Futex {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for Futex {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Futex").field("locked", &self.is_locked()).finish()
    }
}

/********** impl RawLock **************************************************************************/

unsafe impl RawLock for Futex {
    #[inline]
    fn lock(&self) {
        // (FUT:1) this `Acquire` CAS synchronizes-with the `Release` store in (FUT:3)
        while self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            atomic_wait::wait(&self.state, LOCKED);
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        // (FUT:2) this `Acquire` CAS synchronizes-with the `Release` store in (FUT:3)
        self.state.compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        debug_assert!(self.is_locked(), "unlocking a lock that is not held");
        // (FUT:3) this `Release` store synchronizes-with the `Acquire` CAS in (FUT:1) and (FUT:2)
        self.state.store(UNLOCKED, Ordering::Release);
        atomic_wait::wake_one(&self.state);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// LockGuard
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An RAII guard releasing a held [`RawLock`] when dropped.
///
/// The guard is neither `Send` nor `Sync`, the lock is always released by the
/// thread that acquired it.
pub(crate) struct LockGuard<'a, L: RawLock> {
    lock: &'a L,
    _not_send: PhantomData<*const ()>,
}

/********** impl inherent *************************************************************************/

impl<'a, L: RawLock> LockGuard<'a, L> {
    /// Acquires `lock` and returns a guard for it.
    #[inline]
    pub fn lock(lock: &'a L) -> Self {
        lock.lock();
        Self { lock, _not_send: PhantomData }
    }

    /// Attempts to acquire `lock` without blocking.
    #[inline]
    pub fn try_lock(lock: &'a L) -> Option<Self> {
        if lock.try_lock() {
            Some(Self { lock, _not_send: PhantomData })
        } else {
            None
        }
    }
}

/********** impl Drop *****************************************************************************/

impl<L: RawLock> Drop for LockGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        // safety: the guard can only be created by successfully acquiring the lock
        unsafe { self.lock.unlock() };
    }
}
