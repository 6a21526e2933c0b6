//! Counting of outstanding deferred work.
//!
//! Every deferred destruction holds a [`WaitToken`] until it has completed.
//! The owner of the [`WaitGroup`] can block until all tokens have been
//! dropped again.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

////////////////////////////////////////////////////////////////////////////////////////////////////
// WaitGroup
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A counter of outstanding [`WaitToken`]s that can be waited on.
#[derive(Default)]
pub(crate) struct WaitGroup {
    pending: Arc<AtomicU32>,
}

/********** impl inherent *************************************************************************/

impl WaitGroup {
    /// Creates a new [`WaitGroup`] without outstanding tokens.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new token, which counts as outstanding until it is dropped.
    #[inline]
    pub fn token(&self) -> WaitToken {
        let prev = self.pending.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev < u32::MAX, "too many outstanding wait tokens");
        WaitToken { pending: Arc::clone(&self.pending) }
    }

    /// Returns the number of currently outstanding tokens.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Blocks the calling thread until all outstanding tokens are dropped.
    #[inline]
    pub fn wait(&self) {
        loop {
            // (WAI:1) this `Acquire` load synchronizes-with the `Release` decrement in (WAI:2)
            let pending = self.pending.load(Ordering::Acquire);
            if pending == 0 {
                return;
            }

            atomic_wait::wait(&self.pending, pending);
        }
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for WaitGroup {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaitGroup").field("pending", &self.pending()).finish()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// WaitToken
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A token representing one unit of outstanding work of a [`WaitGroup`].
pub(crate) struct WaitToken {
    pending: Arc<AtomicU32>,
}

/********** impl Drop *****************************************************************************/

impl Drop for WaitToken {
    #[inline]
    fn drop(&mut self) {
        // (WAI:2) this `Release` decrement synchronizes-with the `Acquire` load in (WAI:1)
        if self.pending.fetch_sub(1, Ordering::Release) == 1 {
            atomic_wait::wake_all(&*self.pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::WaitGroup;

    #[test]
    fn wait_without_tokens() {
        let group = WaitGroup::new();
        group.wait();
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn wait_for_tokens() {
        let group = WaitGroup::new();
        let done = Arc::new(AtomicBool::new(false));

        let tokens: Vec<_> = (0..4).map(|_| group.token()).collect();
        assert_eq!(group.pending(), 4);

        let handle = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                done.store(true, Ordering::Relaxed);
                drop(tokens);
            })
        };

        group.wait();
        assert!(done.load(Ordering::Relaxed));
        assert_eq!(group.pending(), 0);
        handle.join().unwrap();
    }
}
