//! A segmented lock-free k-FIFO queue supporting out-of-order removal.
//!
//! The queue is a linked list of [`SEGMENT_SIZE`] slot segments.
//! Producers fill the `null` slots of the tail segment in any order,
//! consumers empty the filled slots of the head segment in any order, so no
//! element can be overtaken by more than `SEGMENT_SIZE - 1` elements pushed
//! after it.
//!
//! Every [`push`][RemovableQueue::push] returns an [`ItemHandle`] that can be
//! used to [`remove`][RemovableQueue::remove] the element again as long as it
//! has not been popped.
//! Removed elements leave a `vacant` slot behind, which is refilled by a later
//! push in constant time.
//!
//! Nodes and segments are drawn from process-wide type-stable free lists and
//! are never returned to the global allocator, so all stale pointers remain
//! readable and stale tagged values are rejected by *compare-and-swap*.

mod node;
mod segment;

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::free_list::FreeList;
use crate::stack::TaggedStack;
use crate::tagged::{AtomicTagged, Tagged};

use self::node::Node;
use self::segment::{Segment, SlotState, DELETED, NULL, VACANT};

pub use self::segment::SEGMENT_SIZE;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RemovableQueue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A concurrent multi-producer multi-consumer k-FIFO queue with removal of
/// arbitrary elements.
///
/// # Examples
///
/// ```
/// use hazard_rcu::RemovableQueue;
///
/// let queue = RemovableQueue::new();
/// let _ = queue.push(1);
/// let two = queue.push(2);
/// let _ = queue.push(3);
///
/// assert_eq!(queue.try_pop(), Some(1));
/// assert_eq!(queue.remove(&two), Some(2));
/// assert_eq!(queue.try_pop(), Some(3));
/// assert_eq!(queue.try_pop(), None);
/// ```
pub struct RemovableQueue<T> {
    head: CachePadded<AtomicTagged>,
    tail: CachePadded<AtomicTagged>,
    vacant: TaggedStack,
    len: AtomicUsize,
    id: u64,
    _marker: PhantomData<T>,
}

/********** impl inherent *************************************************************************/

impl<T> RemovableQueue<T> {
    /// Creates a new empty queue.
    #[inline]
    pub fn new() -> Self {
        let (segment, epoch) = Segment::acquire();
        let initial = Tagged::from_ptr(segment.as_ptr(), epoch);
        Self {
            head: CachePadded::new(AtomicTagged::new(initial)),
            tail: CachePadded::new(AtomicTagged::new(initial)),
            vacant: TaggedStack::new(),
            len: AtomicUsize::new(0),
            id: crate::next_instance_id(),
            _marker: PhantomData,
        }
    }

    /// Returns the number of elements in the queue.
    ///
    /// The count is exact only while no other thread operates on the queue.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the queue holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes `value` to the back of the queue and returns a handle that can
    /// be used to remove it again.
    #[inline]
    pub fn push(&self, value: T) -> ItemHandle {
        self.len.fetch_add(1, Ordering::Relaxed);

        if let Some(block) = self.vacant.pop() {
            let node = block.cast::<Node<T>>();
            let epoch = unsafe { node.as_ref().prepare(value) };
            match self.try_refill(node, epoch) {
                Some(handle) => handle,
                None => self.push_node(node, epoch),
            }
        } else {
            let node = FreeList::<Node<T>>::acquire();
            let epoch = unsafe { node.as_ref().prepare(value) };
            self.push_node(node, epoch)
        }
    }

    /// Pops an element from the front of the queue.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        'retry: loop {
            // (QUE:1) this `Acquire` load synchronizes-with the `Release` CAS in (QUE:6)
            let head = self.head.load(Ordering::Acquire);
            let segment = unsafe { &*head.as_ptr::<Segment>() };
            let epoch = head.tag();

            for slot in &segment.slots {
                let curr = slot.load(Ordering::Acquire);
                if curr.tag() != epoch {
                    // the segment has been recycled in the meantime
                    continue 'retry;
                }

                if let SlotState::Filled(node) = SlotState::<T>::of(curr) {
                    let deleted = Tagged::new(DELETED, epoch);
                    // (QUE:2) this `Acquire` CAS synchronizes-with the `Release` CAS in (QUE:4)
                    // and (QUE:5)
                    if slot
                        .compare_exchange(curr, deleted, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                    {
                        self.len.fetch_sub(1, Ordering::Relaxed);
                        unsafe {
                            let value = node.as_ref().take();
                            FreeList::release(node);
                            return Some(value);
                        }
                    }

                    // the element was concurrently popped or removed, a removed element's slot is
                    // only refilled through a successful claim, so it is safe to move on
                }
            }

            // (QUE:3) this `Acquire` load synchronizes-with the `Release` CAS in (QUE:7)
            let next = segment.next.load(Ordering::Acquire);
            if next.is_null() {
                if next.tag() != epoch {
                    continue;
                }

                return None;
            }

            if self.head.load(Ordering::Relaxed) != head || !segment.seal(epoch) {
                continue;
            }

            // the tail must never lag behind the head
            let tail = self.tail.load(Ordering::Acquire);
            if tail == head {
                let _ = self.tail.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            }

            // (QUE:6) this `Release` CAS synchronizes-with the `Acquire` load in (QUE:1)
            if self.head.compare_exchange(head, next, Ordering::Release, Ordering::Relaxed).is_ok() {
                unsafe { Segment::recycle(NonNull::from(segment)) };
            }
        }
    }

    /// Removes the element identified by `handle`, unless it has already been
    /// popped or removed.
    ///
    /// Handles from other queues are always rejected.
    #[inline]
    pub fn remove(&self, handle: &ItemHandle) -> Option<T> {
        if handle.queue != self.id {
            return None;
        }

        // safety: nodes and segments are type-stable, so stale handles can always be read
        let node = unsafe { &*handle.expected.as_ptr::<Node<T>>() };
        if node.epoch() != handle.epoch {
            return None;
        }

        self.claim(handle)
    }

    /// Claims the slot of `handle` and takes its element, if the slot still
    /// holds the node in the handle's epoch.
    #[inline]
    fn claim(&self, handle: &ItemHandle) -> Option<T> {
        let node = unsafe { &*handle.expected.as_ptr::<Node<T>>() };
        let slot = unsafe { handle.slot.as_ref() };
        let epoch = handle.expected.tag();
        // (QUE:2) this `Acquire` CAS synchronizes-with the `Release` CAS in (QUE:4) and (QUE:5)
        slot.compare_exchange(
            handle.expected,
            Tagged::new(VACANT, epoch),
            Ordering::Acquire,
            Ordering::Relaxed,
        )
        .ok()?;

        // a node removed through another copy of the handle may have been refilled into the
        // same slot in between, the refill's epoch is visible after the `Acquire` CAS
        if node.epoch() != handle.epoch {
            self.restore(node, handle);
            return None;
        }

        self.len.fetch_sub(1, Ordering::Relaxed);
        let value = unsafe { node.take() };
        node.set_vacated(Tagged::from_ptr(slot, epoch));
        unsafe { self.vacant.push(NonNull::from(node).cast()) };
        Some(value)
    }

    /// Puts a wrongly claimed `node` back into its slot or, if the slot has
    /// been sealed in the meantime, pushes it again.
    #[cold]
    fn restore(&self, node: &Node<T>, handle: &ItemHandle) {
        let slot = unsafe { handle.slot.as_ref() };
        let vacant = Tagged::new(VACANT, handle.expected.tag());
        // (QUE:4) this `Release` CAS synchronizes-with the `Acquire` CAS in (QUE:2)
        if slot.compare_exchange(vacant, handle.expected, Ordering::Release, Ordering::Relaxed).is_err()
        {
            // the slot has been sealed, the element moves to the tail and its handle goes stale
            let _ = self.push_node(NonNull::from(node), node.epoch());
        }
    }

    /// Attempts to put `node` back into the slot it was removed from.
    #[inline]
    fn try_refill(&self, node: NonNull<Node<T>>, epoch: u64) -> Option<ItemHandle> {
        let vacated = unsafe { node.as_ref().vacated() };
        let slot = unsafe { NonNull::new_unchecked(vacated.as_ptr::<AtomicTagged>()) };
        let filled = Tagged::from_ptr(node.as_ptr(), vacated.tag());

        // (QUE:4) this `Release` CAS synchronizes-with the `Acquire` CAS in (QUE:2)
        unsafe { slot.as_ref() }
            .compare_exchange(
                Tagged::new(VACANT, vacated.tag()),
                filled,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .ok()?;

        Some(ItemHandle { queue: self.id, slot, expected: filled, epoch })
    }

    /// Installs `node` in the first `null` slot of the tail segment, appending
    /// a new segment if necessary.
    #[inline]
    fn push_node(&self, node: NonNull<Node<T>>, epoch: u64) -> ItemHandle {
        'retry: loop {
            let tail = self.tail.load(Ordering::Acquire);
            let segment = unsafe { &*tail.as_ptr::<Segment>() };
            let seg_epoch = tail.tag();
            let filled = Tagged::from_ptr(node.as_ptr(), seg_epoch);

            for slot in &segment.slots {
                let curr = slot.load(Ordering::Relaxed);
                if curr.tag() != seg_epoch {
                    continue 'retry;
                }

                if curr.addr() == NULL {
                    // (QUE:5) this `Release` CAS synchronizes-with the `Acquire` CAS in (QUE:2)
                    match slot.compare_exchange(curr, filled, Ordering::Release, Ordering::Relaxed) {
                        Ok(_) => return self.handle(slot, filled, epoch),
                        Err(actual) if actual.tag() != seg_epoch => continue 'retry,
                        Err(_) => {}
                    }
                }
            }

            let next = segment.next.load(Ordering::Acquire);
            if !next.is_null() {
                // help advancing the tail
                let _ = self.tail.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }

            if next.tag() != seg_epoch || self.tail.load(Ordering::Relaxed) != tail {
                continue;
            }

            // append a new segment with the node already installed in its first slot
            let (appended, appended_epoch) = Segment::acquire();
            let appended_ref = unsafe { appended.as_ref() };
            let filled = Tagged::from_ptr(node.as_ptr(), appended_epoch);
            appended_ref.slots[0].store(filled, Ordering::Relaxed);

            let link = Tagged::from_ptr(appended.as_ptr(), appended_epoch);
            // (QUE:7) this `Release` CAS synchronizes-with the `Acquire` load in (QUE:3)
            match segment.next.compare_exchange(next, link, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => {
                    let _ = self.tail.compare_exchange(tail, link, Ordering::Release, Ordering::Relaxed);
                    return self.handle(&appended_ref.slots[0], filled, epoch);
                }
                Err(_) => {
                    // the segment was never shared
                    appended_ref.slots[0].store(Tagged::new(NULL, appended_epoch), Ordering::Relaxed);
                    unsafe { FreeList::release(appended) };
                }
            }
        }
    }

    #[inline]
    fn handle(&self, slot: &AtomicTagged, expected: Tagged, epoch: u64) -> ItemHandle {
        ItemHandle { queue: self.id, slot: NonNull::from(slot), expected, epoch }
    }
}

/********** impl Default **************************************************************************/

impl<T> Default for RemovableQueue<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl Debug ****************************************************************************/

impl<T> fmt::Debug for RemovableQueue<T> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemovableQueue").field("id", &self.id).field("len", &self.len()).finish()
    }
}

/********** impl Drop *****************************************************************************/

impl<T> Drop for RemovableQueue<T> {
    #[inline]
    fn drop(&mut self) {
        let mut curr = self.head.load(Ordering::Relaxed).as_ptr::<Segment>();
        while let Some(segment) = NonNull::new(curr) {
            let this = unsafe { segment.as_ref() };
            for slot in &this.slots {
                if let SlotState::Filled(node) = SlotState::<T>::of(slot.load(Ordering::Relaxed)) {
                    unsafe {
                        drop(node.as_ref().take());
                        FreeList::release(node);
                    }
                }
            }

            curr = this.next.load(Ordering::Relaxed).as_ptr();
            unsafe { Segment::recycle(segment) };
        }

        while let Some(block) = self.vacant.pop() {
            unsafe { FreeList::<Node<T>>::release(block.cast()) };
        }
    }
}

/********** impl Send + Sync **********************************************************************/

unsafe impl<T: Send> Send for RemovableQueue<T> {}
unsafe impl<T: Send> Sync for RemovableQueue<T> {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ItemHandle
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An opaque, non-owning token identifying a pushed element.
///
/// The handle becomes stale once its element is popped or removed, after
/// which [`remove`][RemovableQueue::remove] rejects it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ItemHandle {
    queue: u64,
    slot: NonNull<AtomicTagged>,
    expected: Tagged,
    epoch: u64,
}

/********** impl Send + Sync **********************************************************************/

unsafe impl Send for ItemHandle {}
unsafe impl Sync for ItemHandle {}
