use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use log::trace;

use crate::free_list::{BlockHeader, Family, FreeList, Item};
use crate::tagged::{AtomicTagged, Tagged};

use super::node::Node;

/// The number of slots per segment, i.e. the `k` of the k-FIFO ordering.
pub const SEGMENT_SIZE: usize = 8;

/// The address of a slot that has never been filled.
pub(crate) const NULL: usize = 0;
/// The address of a slot whose node has been popped (or that has been sealed).
pub(crate) const DELETED: usize = 1;
/// The address of a slot whose node has been removed out of order.
pub(crate) const VACANT: usize = 2;

////////////////////////////////////////////////////////////////////////////////////////////////////
// SlotState
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The decoded state of a slot.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum SlotState<T> {
    Null,
    Deleted,
    Vacant,
    Filled(NonNull<Node<T>>),
}

/********** impl inherent *************************************************************************/

impl<T> SlotState<T> {
    #[inline]
    pub fn of(slot: Tagged) -> Self {
        match slot.addr() {
            NULL => SlotState::Null,
            DELETED => SlotState::Deleted,
            VACANT => SlotState::Vacant,
            // safety: all other addresses are nodes, which are non-null
            addr => SlotState::Filled(unsafe { NonNull::new_unchecked(addr as *mut Node<T>) }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Segment
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A fixed-size array of slots linked to its successor.
///
/// Every slot value and the link to the successor are tagged with the epoch
/// of the segment, except a non-null link, which is tagged with the epoch of
/// the successor.
/// The epoch is advanced whenever a segment is recycled, which invalidates
/// all tagged values computed before.
#[repr(C)]
pub(crate) struct Segment {
    header: BlockHeader,
    pub next: AtomicTagged,
    pub slots: [AtomicTagged; SEGMENT_SIZE],
}

/********** impl inherent *************************************************************************/

impl Segment {
    /// Acquires a clean segment from the free lists and returns it with its
    /// epoch tag.
    #[inline]
    pub fn acquire() -> (NonNull<Segment>, u16) {
        let segment = FreeList::<Segment>::acquire();
        let epoch = unsafe { segment.as_ref() }.epoch();
        (segment, epoch)
    }

    /// Returns the current epoch of the segment.
    #[inline]
    pub fn epoch(&self) -> u16 {
        self.header.epoch.load(Ordering::Relaxed) as u16
    }

    /// Seals every `null` or `vacant` slot tagged with `epoch`, so that it can
    /// no longer be filled.
    ///
    /// Returns `false` if any slot is (or has concurrently become) filled or
    /// if the segment has been recycled.
    #[inline]
    pub fn seal(&self, epoch: u16) -> bool {
        let sealed = Tagged::new(DELETED, epoch);
        for slot in &self.slots {
            let curr = slot.load(Ordering::Acquire);
            if curr.tag() != epoch {
                return false;
            }

            match SlotState::<()>::of(curr) {
                SlotState::Deleted => {}
                SlotState::Filled(_) => return false,
                SlotState::Null | SlotState::Vacant => {
                    if slot
                        .compare_exchange(curr, sealed, Ordering::AcqRel, Ordering::Relaxed)
                        .is_err()
                    {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Wipes `segment` with an advanced epoch and releases it to the free
    /// lists.
    ///
    /// # Safety
    ///
    /// The segment must be unlinked from its queue and no slot may be filled,
    /// null or vacant with the current epoch.
    #[inline]
    pub unsafe fn recycle(segment: NonNull<Segment>) {
        let this = segment.as_ref();
        let epoch = this.header.epoch.load(Ordering::Relaxed).wrapping_add(1);
        this.header.epoch.store(epoch, Ordering::Relaxed);

        let wiped = Tagged::new(NULL, epoch as u16);
        for slot in &this.slots {
            slot.store(wiped, Ordering::Relaxed);
        }

        this.next.store(wiped, Ordering::Relaxed);
        trace!("recycled segment {:p} with epoch {}", segment, epoch as u16);
        FreeList::release(segment);
    }
}

/********** impl Item *****************************************************************************/

unsafe impl Item for Segment {
    const FAMILY: Family = Family::Segments;

    #[inline]
    unsafe fn init_fresh(block: NonNull<Self>) {
        #[allow(clippy::declare_interior_mutable_const)]
        const NULL_SLOT: AtomicTagged = AtomicTagged::null();
        block.as_ptr().write(Segment {
            header: BlockHeader::new(),
            next: AtomicTagged::null(),
            slots: [NULL_SLOT; SEGMENT_SIZE],
        });
    }
}
