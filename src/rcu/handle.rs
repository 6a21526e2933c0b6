//! RAII handles for readers and the writer of an [`RcuVariable`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::lock::{Futex, LockGuard, RawLock};

use super::hazard::{self, HazardRecord};
use super::RcuVariable;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ReadablePtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A protected snapshot of the value of an [`RcuVariable`].
///
/// The snapshot remains valid (and unchanged) for as long as the handle is
/// alive, regardless of any writes committed in the meantime.
/// Dropping the handle ends the protection.
pub struct ReadablePtr<'a, T, L: RawLock = Futex> {
    pub(super) container: &'a RcuVariable<T, L>,
    pub(super) record: &'a HazardRecord,
    pub(super) value: NonNull<T>,
}

/********** impl Clone ****************************************************************************/

impl<T, L: RawLock> Clone for ReadablePtr<'_, T, L> {
    /// Protects the same snapshot with a new hazard record.
    #[inline]
    fn clone(&self) -> Self {
        let record = self.container.acquire_record();
        // the snapshot is still protected by `self`, so it needs no revalidation
        record.set_protected(self.value.cast());
        Self { container: self.container, record, value: self.value }
    }
}

/********** impl Deref ****************************************************************************/

impl<T, L: RawLock> Deref for ReadablePtr<'_, T, L> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe { self.value.as_ref() }
    }
}

/********** impl Drop *****************************************************************************/

impl<T, L: RawLock> Drop for ReadablePtr<'_, T, L> {
    #[inline]
    fn drop(&mut self) {
        self.record.set_free();
        hazard::cache(self.container.id, self.record);
    }
}

/********** impl Debug ****************************************************************************/

impl<T: fmt::Debug, L: RawLock> fmt::Debug for ReadablePtr<'_, T, L> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ReadablePtr").field(&**self).finish()
    }
}

/********** impl Send + Sync **********************************************************************/

unsafe impl<T: Send + Sync, L: RawLock> Send for ReadablePtr<'_, T, L> {}
unsafe impl<T: Send + Sync, L: RawLock> Sync for ReadablePtr<'_, T, L> {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// WritablePtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A private, mutable copy of the value of an [`RcuVariable`] together with
/// its writer lock.
///
/// No other writer can start while the handle is alive.
/// Changes only become visible to readers once the handle is
/// [committed][WritablePtr::commit], dropping the handle without committing
/// discards them.
/// The handle is not `Send`, so the lock is always released on the thread
/// that acquired it.
pub struct WritablePtr<'a, T, L: RawLock = Futex> {
    pub(super) container: &'a RcuVariable<T, L>,
    pub(super) value: Box<T>,
    pub(super) guard: LockGuard<'a, L>,
}

/********** impl inherent *************************************************************************/

impl<T, L: RawLock> WritablePtr<'_, T, L> {
    /// Publishes the new value and retires the previous one.
    ///
    /// The writer lock is released only after the retired values have been
    /// collected.
    #[inline]
    pub fn commit(self) {
        let Self { container, value, guard } = self;
        container.commit_locked(value, &guard);
        drop(guard);
    }
}

/********** impl Deref ****************************************************************************/

impl<T, L: RawLock> Deref for WritablePtr<'_, T, L> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/********** impl DerefMut *************************************************************************/

impl<T, L: RawLock> DerefMut for WritablePtr<'_, T, L> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

/********** impl Debug ****************************************************************************/

impl<T: fmt::Debug, L: RawLock> fmt::Debug for WritablePtr<'_, T, L> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("WritablePtr").field(&*self.value).finish()
    }
}
