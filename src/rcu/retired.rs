//! Type-erased superseded values and the list they wait in until they are no
//! longer protected.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{self, Ordering};

use crate::sanitize;

use super::hazard::HazardList;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Retired
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A type-erased, heap allocated value that has been unpublished and is
/// awaiting reclamation.
pub(crate) struct Retired {
    ptr: NonNull<()>,
    drop: unsafe fn(NonNull<()>),
}

/********** impl inherent *************************************************************************/

impl Retired {
    /// Creates a new [`Retired`] from a pointer obtained with
    /// [`Box::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must be an unpublished boxed `T`, owned by the caller, and `T`
    /// must be `Send` if the record is ever sent to another thread.
    #[inline]
    pub unsafe fn new<T>(ptr: NonNull<T>) -> Self {
        Self { ptr: ptr.cast(), drop: drop_box::<T> }
    }

    #[inline]
    pub fn address(&self) -> *const () {
        self.ptr.as_ptr()
    }

    /// Drops and de-allocates the retired value.
    ///
    /// # Safety
    ///
    /// The value must no longer be protected by any hazard record.
    #[inline]
    pub unsafe fn reclaim(self) {
        (self.drop)(self.ptr);
    }
}

/********** impl Send *****************************************************************************/

unsafe impl Send for Retired {}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for Retired {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Retired").field("address", &self.address()).finish()
    }
}

unsafe fn drop_box<T>(ptr: NonNull<()>) {
    drop(Box::from_raw(ptr.cast::<T>().as_ptr()));
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetireList
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The values retired by the writers of one container.
#[derive(Debug, Default)]
pub(crate) struct RetireList {
    retired: Vec<Retired>,
    scan_cache: Vec<*const ()>,
}

/********** impl inherent *************************************************************************/

impl RetireList {
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { retired: Vec::with_capacity(capacity), scan_cache: Vec::with_capacity(capacity) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.retired.len()
    }

    /// Adds `retired` (if any) to the list and hands every value that is not
    /// protected by any record of `hazards` to `reclaim`.
    ///
    /// # Safety
    ///
    /// All retired values must have been unpublished before this call.
    #[inline]
    pub unsafe fn retire_and_collect(
        &mut self,
        retired: Option<Retired>,
        hazards: &HazardList,
        mut reclaim: impl FnMut(Retired),
    ) {
        self.retired.extend(retired);
        if self.retired.is_empty() {
            return;
        }

        self.collect_protected(hazards);

        let mut idx = 0;
        while idx < self.retired.len() {
            if self.scan_cache.binary_search(&self.retired[idx].address()).is_ok() {
                idx += 1;
            } else {
                reclaim(self.retired.swap_remove(idx));
            }
        }
    }

    /// Removes and returns all retired values.
    #[inline]
    pub fn drain(&mut self) -> impl Iterator<Item = Retired> + '_ {
        self.retired.drain(..)
    }

    #[inline]
    fn collect_protected(&mut self, hazards: &HazardList) {
        self.scan_cache.clear();

        // (RET:1) this `SeqCst` fence orders the preceding unpublishing of retired values with the
        // `SeqCst` stores in (HAZ:1), so any reader whose protection is missed here is guaranteed
        // to observe the new value when it revalidates
        atomic::fence(Ordering::SeqCst);
        self.scan_cache.extend(
            hazards
                .iter()
                .filter_map(|record| record.protected(sanitize::RELAXED_LOAD))
                .map(|protected| protected.as_ptr() as *const ()),
        );
        // (RET:2) this `Acquire` fence synchronizes-with the `Release` stores in (HAZ:2)
        atomic::fence(Ordering::Acquire);

        self.scan_cache.sort_unstable();
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::rc::Rc;

    use crate::rcu::hazard::HazardList;

    use super::{RetireList, Retired};

    fn retire(value: &Rc<i32>) -> Retired {
        unsafe { Retired::new(NonNull::new_unchecked(Box::into_raw(Box::new(Rc::clone(value))))) }
    }

    #[test]
    fn collect_unprotected() {
        let value = Rc::new(1);
        let hazards = HazardList::new();
        let mut list = RetireList::with_capacity(4);

        let mut reclaimed = 0;
        unsafe {
            list.retire_and_collect(Some(retire(&value)), &hazards, |retired| {
                reclaimed += 1;
                retired.reclaim();
            })
        };

        assert_eq!(reclaimed, 1);
        assert_eq!(list.len(), 0);
        assert_eq!(Rc::strong_count(&value), 1);
    }

    #[test]
    fn keep_protected() {
        let value = Rc::new(1);
        let hazards = HazardList::new();
        let mut list = RetireList::with_capacity(4);

        let protected = retire(&value);
        let record = hazards.acquire(0);
        record.set_protected(NonNull::new(protected.address() as *mut ()).unwrap());

        unsafe {
            list.retire_and_collect(Some(protected), &hazards, |retired| retired.reclaim());
            list.retire_and_collect(Some(retire(&value)), &hazards, |retired| retired.reclaim());
        }

        assert_eq!(list.len(), 1);
        assert_eq!(Rc::strong_count(&value), 2);

        // once the record is released, the next collection reclaims the value
        record.set_free();
        unsafe { list.retire_and_collect(None, &hazards, |retired| retired.reclaim()) };
        assert_eq!(list.len(), 0);
        assert_eq!(Rc::strong_count(&value), 1);
    }
}
