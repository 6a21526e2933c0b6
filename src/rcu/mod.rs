//! Read-copy-update variables protected by hazard pointers.
//!
//! An [`RcuVariable`] holds a single heap allocated value.
//! Any number of readers can obtain [`ReadablePtr`]s to the current value
//! without ever blocking each other or a writer.
//! A single writer at a time can obtain a [`WritablePtr`] holding a private
//! value, which replaces the current value when it is committed.
//!
//! # Reclamation
//!
//! Every reader publishes the address of its snapshot in a hazard record that
//! belongs to the variable.
//! When a writer commits, the previous value is *retired*: it is reclaimed
//! immediately if no hazard record holds its address and is otherwise kept in
//! the variable's retire list, which is rescanned on every subsequent commit
//! or [`cleanup`][RcuVariable::cleanup].
//!
//! Variables created with an [`Executor`] hand the destruction of unprotected
//! values to the executor instead of running it on the writer's thread.
//! Dropping such a variable blocks until all handed off destructions have
//! completed.

mod handle;
mod hazard;
mod retired;

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use log::debug;

use crate::config;
use crate::executor::Executor;
use crate::lock::{Futex, LockGuard, RawLock};
use crate::wait::WaitGroup;

use self::hazard::{HazardList, HazardRecord};
use self::retired::{RetireList, Retired};

pub use self::handle::{ReadablePtr, WritablePtr};

////////////////////////////////////////////////////////////////////////////////////////////////////
// RcuVariable
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A shared value that is read without locks and replaced by copy-and-commit.
///
/// # Examples
///
/// ```
/// use hazard_rcu::RcuVariable;
///
/// let var = RcuVariable::new(10);
/// let old = var.read();
/// var.assign(20);
///
/// assert_eq!(*old, 10);
/// assert_eq!(*var.read(), 20);
/// ```
pub struct RcuVariable<T, L: RawLock = Futex> {
    current: AtomicPtr<T>,
    lock: L,
    hazards: HazardList,
    retired: UnsafeCell<RetireList>,
    reclamation: Reclamation,
    id: u64,
    _marker: PhantomData<T>,
}

/********** impl inherent (default lock) **********************************************************/

impl<T> RcuVariable<T> {
    /// Creates a new [`RcuVariable`] that destroys superseded values on the
    /// committing writer's thread.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::with_lock(value, Futex::new())
    }

    /// Creates a new [`RcuVariable`] that hands the destruction of superseded
    /// values to `executor`.
    ///
    /// Values of types without drop glue are always destroyed immediately.
    #[inline]
    pub fn with_executor(value: T, executor: impl Executor + 'static) -> Self
    where
        T: Send + 'static,
    {
        Self::with_lock_and_executor(value, Futex::new(), executor)
    }
}

/********** impl inherent *************************************************************************/

impl<T, L: RawLock> RcuVariable<T, L> {
    /// Creates a new [`RcuVariable`] using `lock` as writer lock.
    #[inline]
    pub fn with_lock(value: T, lock: L) -> Self {
        Self::with_reclamation(value, lock, Reclamation::Immediate)
    }

    /// Creates a new [`RcuVariable`] using `lock` as writer lock and handing
    /// the destruction of superseded values to `executor`.
    #[inline]
    pub fn with_lock_and_executor(value: T, lock: L, executor: impl Executor + 'static) -> Self
    where
        T: Send + 'static,
    {
        let reclamation = if mem::needs_drop::<T>() {
            Reclamation::Deferred { executor: Box::new(executor), group: WaitGroup::new() }
        } else {
            Reclamation::Immediate
        };

        Self::with_reclamation(value, lock, reclamation)
    }

    /// Returns a protected snapshot of the current value.
    #[inline]
    pub fn read(&self) -> ReadablePtr<'_, T, L> {
        let record = self.acquire_record();

        let mut curr = self.current.load(Ordering::Relaxed);
        loop {
            record.set_protected(Self::non_null(curr).cast());
            // (RCU:1) this `SeqCst` load is ordered after the `SeqCst` store in (HAZ:1) and
            // synchronizes-with the `SeqCst` swap in (RCU:2)
            let reread = self.current.load(Ordering::SeqCst);
            if reread == curr {
                break;
            }

            curr = reread;
        }

        ReadablePtr { container: self, record, value: Self::non_null(curr) }
    }

    /// Returns a copy of the current value.
    #[inline]
    pub fn read_copy(&self) -> T
    where
        T: Clone,
    {
        T::clone(&self.read())
    }

    /// Acquires the writer lock and returns a copy of the current value for
    /// modification.
    ///
    /// Blocks while another writer is active.
    #[inline]
    pub fn start_write(&self) -> WritablePtr<'_, T, L>
    where
        T: Clone,
    {
        let guard = LockGuard::lock(&self.lock);
        self.copy_current(guard)
    }

    /// Attempts to acquire the writer lock without blocking and returns a copy
    /// of the current value for modification.
    ///
    /// Returns `None` if another writer is active.
    #[inline]
    pub fn try_start_write(&self) -> Option<WritablePtr<'_, T, L>>
    where
        T: Clone,
    {
        LockGuard::try_lock(&self.lock).map(|guard| self.copy_current(guard))
    }

    /// Acquires the writer lock and returns a handle to `value`, which
    /// replaces the current value when committed.
    #[inline]
    pub fn start_write_emplace(&self, value: T) -> WritablePtr<'_, T, L> {
        let guard = LockGuard::lock(&self.lock);
        WritablePtr { container: self, value: Box::new(value), guard }
    }

    /// Replaces the current value with `value`.
    #[inline]
    pub fn assign(&self, value: T) {
        self.start_write_emplace(value).commit();
    }

    /// Replaces the current value with the value returned by `f`, which is
    /// called while the writer lock is held.
    #[inline]
    pub fn emplace(&self, f: impl FnOnce() -> T) {
        let guard = LockGuard::lock(&self.lock);
        let value = Box::new(f());
        WritablePtr { container: self, value, guard }.commit();
    }

    /// Reclaims all retired values that are no longer protected, unless
    /// another writer is active.
    ///
    /// This never blocks.
    #[inline]
    pub fn cleanup(&self) {
        if let Some(guard) = LockGuard::try_lock(&self.lock) {
            self.collect(None, &guard);
        }
    }

    #[inline]
    fn with_reclamation(value: T, lock: L, reclamation: Reclamation) -> Self {
        Self {
            current: AtomicPtr::new(Box::into_raw(Box::new(value))),
            lock,
            hazards: HazardList::new(),
            retired: UnsafeCell::new(RetireList::with_capacity(config::current().retire_cache())),
            reclamation,
            id: crate::next_instance_id(),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn copy_current<'a>(&'a self, guard: LockGuard<'a, L>) -> WritablePtr<'a, T, L>
    where
        T: Clone,
    {
        // only writers retire values, so the current value can not be reclaimed while the lock
        // is held
        let curr = self.current.load(Ordering::Acquire);
        let value = Box::new(unsafe { Self::non_null(curr).as_ref() }.clone());
        WritablePtr { container: self, value, guard }
    }

    /// Reserves a hazard record, preferring the calling thread's cached one.
    #[inline]
    fn acquire_record(&self) -> &HazardRecord {
        if let Some(record) = hazard::take_cached(self.id) {
            // safety: the cached record belongs to this variable and is therefore alive
            let record = unsafe { &*record.as_ptr() };
            debug_assert_eq!(record.owner(), self.id);
            if record.try_reserve() {
                return record;
            }
        }

        self.hazards.acquire(self.id)
    }

    #[inline]
    fn commit_locked(&self, value: Box<T>, guard: &LockGuard<'_, L>) {
        // (RCU:2) this `SeqCst` swap synchronizes-with the `SeqCst` load in (RCU:1)
        let old = self.current.swap(Box::into_raw(value), Ordering::SeqCst);
        // safety: the previous value has just been unpublished and is owned by this writer
        let retired = unsafe { Retired::new(Self::non_null(old)) };
        self.collect(Some(retired), guard);
    }

    #[inline]
    fn collect(&self, retired: Option<Retired>, _guard: &LockGuard<'_, L>) {
        // safety: the retire list is only accessed while the writer lock is held
        let list = unsafe { &mut *self.retired.get() };
        unsafe { list.retire_and_collect(retired, &self.hazards, |retired| self.reclaim(retired)) };
    }

    #[inline]
    fn reclaim(&self, retired: Retired) {
        match &self.reclamation {
            Reclamation::Immediate => unsafe { retired.reclaim() },
            Reclamation::Deferred { executor, group } => {
                let token = group.token();
                executor.spawn_detached(Box::new(move || {
                    unsafe { retired.reclaim() };
                    drop(token);
                }));
            }
        }
    }

    #[inline]
    fn non_null(ptr: *mut T) -> NonNull<T> {
        debug_assert!(!ptr.is_null());
        // safety: the current value is never null
        unsafe { NonNull::new_unchecked(ptr) }
    }
}

/********** impl Default **************************************************************************/

impl<T: Default> Default for RcuVariable<T> {
    #[inline]
    fn default() -> Self {
        Self::new(T::default())
    }
}

/********** impl Debug ****************************************************************************/

impl<T, L: RawLock> fmt::Debug for RcuVariable<T, L> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RcuVariable")
            .field("id", &self.id)
            .field("deferred", &matches!(self.reclamation, Reclamation::Deferred { .. }))
            .finish()
    }
}

/********** impl Drop *****************************************************************************/

impl<T, L: RawLock> Drop for RcuVariable<T, L> {
    #[inline]
    fn drop(&mut self) {
        // no handles can be alive, since they borrow the variable
        unsafe { drop(Box::from_raw(*self.current.get_mut())) };

        let list = self.retired.get_mut();
        let retired = list.len();
        for retired in list.drain() {
            unsafe { retired.reclaim() };
        }

        if let Reclamation::Deferred { group, .. } = &self.reclamation {
            let pending = group.pending();
            if pending > 0 {
                debug!(
                    "rcu variable {} ({} retired) waiting for {} deferred destructions",
                    self.id, retired, pending
                );
            }

            group.wait();
        }
    }
}

/********** impl Send + Sync **********************************************************************/

unsafe impl<T: Send, L: RawLock> Send for RcuVariable<T, L> {}
unsafe impl<T: Send + Sync, L: RawLock> Sync for RcuVariable<T, L> {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Reclamation
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The policy for destroying unprotected retired values.
enum Reclamation {
    Immediate,
    Deferred { executor: Box<dyn Executor>, group: WaitGroup },
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};

    use crate::executor::Task;

    use super::RcuVariable;

    struct DropCount(Arc<AtomicUsize>);

    impl Drop for DropCount {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn read_and_assign() {
        let var = RcuVariable::new(10);
        assert_eq!(*var.read(), 10);
        var.assign(20);
        assert_eq!(*var.read(), 20);
        assert_eq!(var.read_copy(), 20);
    }

    #[test]
    fn records_are_recycled() {
        let var = RcuVariable::new(1);
        for _ in 0..16 {
            let _a = var.read();
            let _b = var.read();
        }

        // two concurrently alive readers require exactly two records
        assert_eq!(var.hazards.iter().count(), 2);
    }

    #[test]
    fn protected_value_is_retired() {
        let drops = Arc::new(AtomicUsize::new(0));
        let var = RcuVariable::new(DropCount(Arc::clone(&drops)));

        let snapshot = var.read();
        var.assign(DropCount(Arc::clone(&drops)));
        assert_eq!(drops.load(Ordering::Relaxed), 0);
        assert_eq!(unsafe { (*var.retired.get()).len() }, 1);

        drop(snapshot);
        var.cleanup();
        assert_eq!(drops.load(Ordering::Relaxed), 1);
        assert_eq!(unsafe { (*var.retired.get()).len() }, 0);

        drop(var);
        assert_eq!(drops.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn clone_protects_snapshot() {
        let drops = Arc::new(AtomicUsize::new(0));
        let var = RcuVariable::new(DropCount(Arc::clone(&drops)));

        let first = var.read();
        let second = first.clone();
        drop(first);

        var.assign(DropCount(Arc::clone(&drops)));
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        drop(second);
        var.cleanup();
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn discarded_write() {
        let var = RcuVariable::new(String::from("a"));
        {
            let mut write = var.start_write();
            write.push('b');
            assert_eq!(*write, "ab");
        }

        assert_eq!(*var.read(), "a");
        let mut write = var.start_write();
        write.push('c');
        write.commit();
        assert_eq!(*var.read(), "ac");
    }

    #[test]
    fn deferred_reclamation() {
        let (tx, rx) = mpsc::channel::<Task>();
        let tx = Mutex::new(tx);
        let drops = Arc::new(AtomicUsize::new(0));
        let var = RcuVariable::with_executor(DropCount(Arc::clone(&drops)), move |task: Task| {
            tx.lock().unwrap().send(task).unwrap();
        });

        var.assign(DropCount(Arc::clone(&drops)));
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        let task = rx.recv().unwrap();
        task();
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }
}
