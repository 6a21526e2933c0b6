//! Per-container registries of hazard records.

use std::cell::Cell;
use std::iter::FusedIterator;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

/// State of a record that can be reserved by any thread.
const FREE: *mut () = ptr::null_mut();
/// State of a record that is reserved but does not protect any value yet.
const RESERVED: *mut () = 1 as *mut ();

thread_local!(static CACHED: Cell<Option<Cached>> = Cell::new(None));

/// Takes the calling thread's cached record, if it belongs to container `owner`.
///
/// The cache is left empty either way.
#[inline]
pub(super) fn take_cached(owner: u64) -> Option<NonNull<HazardRecord>> {
    CACHED
        .try_with(|cached| cached.take())
        .ok()
        .flatten()
        .filter(|cached| cached.owner == owner)
        .map(|cached| cached.record)
}

/// Caches the (released) `record` of container `owner` for the calling thread.
#[inline]
pub(super) fn cache(owner: u64, record: &HazardRecord) {
    let _ = CACHED.try_with(|cached| {
        cached.set(Some(Cached { owner, record: NonNull::from(record) }));
    });
}

/// The thread-local cache entry.
///
/// Container identities are never reused, so the record can only be
/// dereferenced by the container that owns it.
#[derive(Copy, Clone)]
struct Cached {
    owner: u64,
    record: NonNull<HazardRecord>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardRecord
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A slot that is visible to all threads and indicates that the value whose
/// address it holds is in use and must not be reclaimed.
#[derive(Debug)]
pub(crate) struct HazardRecord {
    protected: CachePadded<AtomicPtr<()>>,
    owner: u64,
    next: *const HazardRecord,
}

/********** impl inherent *************************************************************************/

impl HazardRecord {
    /// Returns the identity of the container owning the record.
    #[inline]
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Attempts to reserve the record if it is currently free.
    #[inline]
    pub fn try_reserve(&self) -> bool {
        self.protected.load(Ordering::Relaxed) == FREE
            && self
                .protected
                .compare_exchange(FREE, RESERVED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    /// Publishes `protected` as being in use.
    #[inline]
    pub fn set_protected(&self, protected: NonNull<()>) {
        // (HAZ:1) this `SeqCst` store is ordered with the `SeqCst` fence in (RET:1)
        self.protected.store(protected.as_ptr(), Ordering::SeqCst);
    }

    /// Frees the record, ending the protection of any previously published
    /// value.
    #[inline]
    pub fn set_free(&self) {
        // (HAZ:2) this `Release` store synchronizes-with the `Acquire` fence in (RET:2)
        self.protected.store(FREE, Ordering::Release);
    }

    /// Returns the currently protected address, if there is one.
    #[inline]
    pub fn protected(&self, order: Ordering) -> Option<NonNull<()>> {
        let ptr = self.protected.load(order);
        if ptr == RESERVED {
            None
        } else {
            NonNull::new(ptr)
        }
    }

    #[inline]
    fn is_free(&self) -> bool {
        self.protected.load(Ordering::Relaxed) == FREE
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardList
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An append-only linked list of [`HazardRecord`]s.
///
/// Records are never unlinked while the list is alive, they are only recycled
/// by being freed and reserved again.
#[derive(Debug, Default)]
pub(crate) struct HazardList {
    head: AtomicPtr<HazardRecord>,
}

/********** impl inherent *************************************************************************/

impl HazardList {
    /// Creates a new empty list.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an iterator over all records.
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        // (LIS:1) this `Acquire` load synchronizes-with the `Release` CAS in (LIS:2)
        Iter { current: unsafe { self.head.load(Ordering::Acquire).as_ref() } }
    }

    /// Reserves a free record owned by `owner` or inserts a new one, if none is
    /// free.
    #[inline]
    pub fn acquire(&self, owner: u64) -> &HazardRecord {
        match self.iter().find(|record| record.try_reserve()) {
            Some(record) => record,
            None => self.insert_reserved(owner),
        }
    }

    #[cold]
    fn insert_reserved(&self, owner: u64) -> &HazardRecord {
        let record = Box::into_raw(Box::new(HazardRecord {
            protected: CachePadded::new(AtomicPtr::new(RESERVED)),
            owner,
            next: ptr::null(),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // safety: the record is not yet shared
            unsafe { (*record).next = head };
            // (LIS:2) this `Release` CAS synchronizes-with the `Acquire` loads in (LIS:1), (LIS:3)
            match self.head.compare_exchange_weak(head, record, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return unsafe { &*record },
                Err(actual) => head = actual,
            }
        }
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for HazardList {
    #[inline]
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let record = unsafe { Box::from_raw(curr) };
            debug_assert!(record.is_free(), "hazard record still in use on drop");
            curr = record.next as *mut _;
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Iter
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub(crate) struct Iter<'a> {
    current: Option<&'a HazardRecord>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a HazardRecord;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let next = self.current.take();
        if let Some(record) = next {
            // (LIS:3) the `next` field is immutable once published by (LIS:2)
            self.current = unsafe { record.next.as_ref() };
        }

        next
    }
}

impl FusedIterator for Iter<'_> {}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::sync::atomic::Ordering;

    use super::{cache, take_cached, HazardList, HazardRecord};

    #[test]
    fn reserve_and_recycle() {
        let list = HazardList::new();
        let first = list.acquire(1) as *const HazardRecord;
        let second = list.acquire(1) as *const HazardRecord;
        assert_ne!(first, second);
        assert_eq!(list.iter().count(), 2);

        // a freed record is reused instead of inserting a new one
        unsafe { (*second).set_free() };
        assert_eq!(list.acquire(1) as *const HazardRecord, second);
        assert_eq!(list.iter().count(), 2);

        for record in list.iter() {
            record.set_free();
        }
    }

    #[test]
    fn protected() {
        let list = HazardList::new();
        let record = list.acquire(7);
        assert_eq!(record.owner(), 7);
        assert!(record.protected(Ordering::Relaxed).is_none());

        let ptr = NonNull::new(0xDEAD_BEE8 as *mut ()).unwrap();
        record.set_protected(ptr);
        assert_eq!(record.protected(Ordering::Relaxed), Some(ptr));
        assert!(!record.try_reserve());

        record.set_free();
        assert!(record.protected(Ordering::Relaxed).is_none());
    }

    #[test]
    fn thread_local_cache() {
        let list = HazardList::new();
        let record = list.acquire(42);
        record.set_free();
        cache(42, record);

        // a different owner misses and clears the cache
        assert!(take_cached(41).is_none());
        assert!(take_cached(42).is_none());

        cache(42, record);
        assert_eq!(take_cached(42), Some(NonNull::from(record)));
        assert!(take_cached(42).is_none());
    }
}
