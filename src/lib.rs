//! Hazard pointer protected RCU variables and a segmented k-FIFO queue with
//! out-of-order removal.
//!
//! # Read-Copy-Update
//!
//! An [`RcuVariable`] is a read-mostly shared value.
//! Readers obtain [`ReadablePtr`]s, which are protected snapshots of the
//! current value and never block, neither each other nor a writer.
//! A single writer at a time obtains a [`WritablePtr`], which holds a private
//! copy (or a freshly constructed value) and the writer lock.
//! Committing it atomically publishes the new value, after which the previous
//! value is *retired*.
//!
//! Retired values are reclaimed once no reader holds a snapshot of them
//! anymore.
//! This is determined with hazard pointers as described by Maged M. Michael in
//! 2004 [[1]]: every reader announces the address of its snapshot in a hazard
//! record of the variable and the writer only frees values whose address is
//! not announced in any record.
//! Reclamation either happens right away on the writer's thread or is handed
//! to an [`Executor`], which is useful for values that are expensive to drop.
//!
//! # Removable Queue
//!
//! A [`RemovableQueue`] is a lock-free multi-producer multi-consumer queue,
//! which relaxes strict FIFO order to k-FIFO order (with `k` being
//! [`SEGMENT_SIZE`]) in exchange for scalability.
//! Every push returns an [`ItemHandle`] that can be used to remove the element
//! out of order, as long as it has not been popped yet.
//! For any element, exactly one of a pop and a removal racing for it succeeds.
//!
//! Nodes and segments of all queues are drawn from two-tiered (thread local
//! and global) free lists and are never returned to the global allocator.
//!
//! # Configuration
//!
//! Runtime parameters can be set once per process through [`init_config`]
//! before the first variable is created or the first thread accesses its free
//! lists.
//! The capacity of the thread local free lists is fixed at compile time by
//! the `HAZARD_RCU_LOCAL_CAPACITY` environment variable (default 32).
//!
//! [1]: https://dl.acm.org/citation.cfm?id=987595

#![warn(missing_docs)]

mod config;
mod executor;
mod free_list;
mod lock;
mod queue;
mod rcu;
mod stack;
mod tagged;
mod wait;

use std::sync::atomic::{AtomicU64, Ordering};

pub use crate::config::{init_config, Config, ConfigBuilder, ConfigError, CONFIG};
pub use crate::executor::{Executor, Task, ThreadExecutor};
pub use crate::lock::{Futex, RawLock};
pub use crate::queue::{ItemHandle, RemovableQueue, SEGMENT_SIZE};
pub use crate::rcu::{RcuVariable, ReadablePtr, WritablePtr};

/// Returns a process-unique identity for a new container.
///
/// Identities are never reused, so a stale identity can never match a live
/// container.
#[inline]
pub(crate) fn next_instance_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "sanitize-threads")] {
        mod sanitize {
            use std::sync::atomic::Ordering;

            pub const RELAXED_LOAD: Ordering = Ordering::Acquire;
        }
    } else {
        mod sanitize {
            use std::sync::atomic::Ordering;

            pub const RELAXED_LOAD: Ordering = Ordering::Relaxed;
        }
    }
}
