use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use crate::free_list::{BlockHeader, Family, Item};
use crate::tagged::{AtomicTagged, Tagged};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Node
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The holder of a single queued element.
///
/// A node is owned by exactly one of an active slot, the vacant list of a
/// queue or the free lists.
#[repr(C)]
pub(crate) struct Node<T> {
    header: BlockHeader,
    /// The (slot address, segment epoch) pair of the slot the node was removed
    /// from while it is parked on a vacant list.
    vacated: AtomicTagged,
    payload: UnsafeCell<MaybeUninit<T>>,
}

/********** impl inherent *************************************************************************/

impl<T> Node<T> {
    /// Returns the current reuse epoch.
    #[inline]
    pub fn epoch(&self) -> u64 {
        // (NOD:1) this `Acquire` load synchronizes-with the `Release` increment in (NOD:2)
        self.header.epoch.load(Ordering::Acquire)
    }

    /// Starts a new reuse epoch and stores `value` as payload.
    ///
    /// Returns the new epoch.
    ///
    /// # Safety
    ///
    /// The caller must own the node and its payload must be uninitialized.
    #[inline]
    pub unsafe fn prepare(&self, value: T) -> u64 {
        // (NOD:2) this `Release` increment synchronizes-with the `Acquire` load in (NOD:1)
        let epoch = self.header.epoch.fetch_add(1, Ordering::Release).wrapping_add(1);
        (*self.payload.get()).as_mut_ptr().write(value);
        epoch
    }

    /// Moves the payload out of the node.
    ///
    /// # Safety
    ///
    /// The caller must have claimed the node and its payload must be
    /// initialized.
    #[inline]
    pub unsafe fn take(&self) -> T {
        ptr::read((*self.payload.get()).as_ptr())
    }

    #[inline]
    pub fn vacated(&self) -> Tagged {
        self.vacated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_vacated(&self, slot: Tagged) {
        self.vacated.store(slot, Ordering::Relaxed);
    }
}

/********** impl Item *****************************************************************************/

unsafe impl<T> Item for Node<T> {
    const FAMILY: Family = Family::Nodes;

    #[inline]
    unsafe fn init_fresh(block: NonNull<Self>) {
        BlockHeader::init(block.cast());
        ptr::addr_of_mut!((*block.as_ptr()).vacated).write(AtomicTagged::null());
    }
}
