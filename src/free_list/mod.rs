//! Two-tier free lists supplying the queue with nodes and segments.
//!
//! # Tiers
//!
//! Every thread owns a bounded cache of free blocks per pool (the *local*
//! tier).
//! When it is empty, blocks are taken from the process-wide lock-free stacks
//! (the *global* tier) and only if those are empty as well, a new block is
//! allocated.
//! Released blocks go to the local tier until it is full and to the global
//! tier afterwards.
//! When a thread exits, its remaining cached blocks are drained into the
//! global tier.
//!
//! # Type stability
//!
//! Blocks are never returned to the global allocator.
//! Every block starts with a [`BlockHeader`] that is initialized once when the
//! block is first allocated and that keeps its meaning across all subsequent
//! reuses.
//! Stale pointers to pooled blocks may therefore always be dereferenced for
//! reading atomic header (or slot) fields, which is what allows the queue to
//! detect staleness with tagged *compare-and-swap* operations instead of
//! deferring reclamation.
//!
//! Nodes of all element types share pools by power-of-two size class,
//! segments have a pool of their own.

mod global;
mod local;

use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64};

use log::trace;

use crate::tagged::ADDR_MASK;

use self::global::GLOBAL;

/// The pool index used for segments.
const SEGMENT_POOL: usize = 0;
/// The smallest node block is 2^5 = 32 bytes.
const MIN_SHIFT: u32 = 5;
/// The largest node block is 2^47 bytes, which exhausts the address space.
const NODE_CLASSES: usize = (47 - MIN_SHIFT + 1) as usize;
/// The total number of pools (segments and all node size classes).
const POOLS: usize = 1 + NODE_CLASSES;
/// Blocks are never aligned to more than a page.
const MAX_ALIGN: usize = 4096;

////////////////////////////////////////////////////////////////////////////////////////////////////
// BlockHeader
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The header at the start of every pooled block.
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct BlockHeader {
    /// The link used by the intrusive stacks the block is stored in.
    pub next: AtomicPtr<BlockHeader>,
    /// The reuse epoch of the block, which is never reset.
    pub epoch: AtomicU64,
}

/********** impl inherent *************************************************************************/

impl BlockHeader {
    #[inline]
    pub const fn new() -> Self {
        Self { next: AtomicPtr::new(ptr::null_mut()), epoch: AtomicU64::new(0) }
    }

    /// Initializes the header of a freshly allocated block.
    ///
    /// # Safety
    ///
    /// `block` must point at allocated, unshared memory.
    #[inline]
    pub unsafe fn init(block: NonNull<Self>) {
        block.as_ptr().write(Self::new());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Item (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The family of pools an [`Item`] is drawn from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Family {
    Segments,
    Nodes,
}

/// A type whose instances are kept in a [`FreeList`].
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a [`BlockHeader`] as their first
/// field and must never overwrite that header non-atomically once
/// `init_fresh` has run.
/// At most one type may be implemented with [`Family::Segments`] and all
/// [`Family::Nodes`] types must agree on the layout of every field they
/// access through stale pointers.
pub(crate) unsafe trait Item: Sized {
    /// The pool family of this type.
    const FAMILY: Family;

    /// Initializes a block that has just been obtained from the global
    /// allocator.
    ///
    /// # Safety
    ///
    /// `block` must point at allocated, unshared memory of sufficient size.
    unsafe fn init_fresh(block: NonNull<Self>);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// FreeList
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The typed access point to the pools holding blocks for `I`.
pub(crate) struct FreeList<I>(PhantomData<I>);

/********** impl inherent *************************************************************************/

impl<I: Item> FreeList<I> {
    /// Acquires a block for an `I`.
    ///
    /// The header of the returned block is initialized, everything else is
    /// either freshly initialized by [`Item::init_fresh`] or left as it was
    /// when the block was last released.
    /// The block is exclusively owned by the caller until it is released.
    #[inline]
    pub fn acquire() -> NonNull<I> {
        let pool = Self::pool();
        if let Some(block) = local::try_acquire(pool) {
            return block.cast();
        }

        match GLOBAL.acquire(pool) {
            Some(block) => block.cast(),
            None => Self::allocate_fresh(pool),
        }
    }

    /// Releases `item` to the free lists.
    ///
    /// # Safety
    ///
    /// `item` must have been acquired from this free list and must not be
    /// accessed mutably afterwards by the caller.
    #[inline]
    pub unsafe fn release(item: NonNull<I>) {
        let pool = Self::pool();
        let block = item.cast::<BlockHeader>();
        if let Err(err) = local::try_release(pool, block) {
            trace!("releasing block to global pool {}: {}", pool, err);
            GLOBAL.release(pool, block);
        }
    }

    /// Returns the index of the pool for `I`.
    #[inline]
    fn pool() -> usize {
        match I::FAMILY {
            Family::Segments => SEGMENT_POOL,
            Family::Nodes => 1 + node_class(Layout::new::<I>()),
        }
    }

    /// Returns the layout of blocks of the pool for `I`.
    #[inline]
    fn block_layout() -> Layout {
        match I::FAMILY {
            Family::Segments => Layout::new::<I>(),
            Family::Nodes => {
                let size = 1usize << (MIN_SHIFT as usize + node_class(Layout::new::<I>()));
                // safety: size is a non-zero power of two and so is the alignment, which is
                // at most as large as the size
                unsafe { Layout::from_size_align_unchecked(size, size.min(MAX_ALIGN)) }
            }
        }
    }

    #[cold]
    #[inline(never)]
    fn allocate_fresh(pool: usize) -> NonNull<I> {
        let layout = Self::block_layout();
        let block = NonNull::new(unsafe { alloc::alloc(layout) })
            .unwrap_or_else(|| alloc::handle_alloc_error(layout))
            .cast::<I>();

        assert_eq!(
            block.as_ptr() as u64 & !ADDR_MASK,
            0,
            "pooled blocks must be allocated below 2^48"
        );

        unsafe { I::init_fresh(block) };
        trace!("allocated fresh {} byte block for pool {}", layout.size(), pool);
        block
    }
}

/// Returns the size class for nodes of the given `layout`.
///
/// # Panics
///
/// Panics if the layout requires more than page alignment.
#[inline]
fn node_class(layout: Layout) -> usize {
    assert!(layout.align() <= MAX_ALIGN, "queue elements may not be aligned to more than a page");
    let size = layout.size().max(1 << MIN_SHIFT).next_power_of_two();
    let class = (size.trailing_zeros() - MIN_SHIFT) as usize;
    assert!(class < NODE_CLASSES, "queue element size exceeds the largest size class");
    class
}
