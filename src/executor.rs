//! The spawn-and-forget task facility used for deferred reclamation.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;

use log::warn;

/// A unit of detached work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Executor (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A facility for running tasks asynchronously without joining them.
///
/// [`RcuVariable`][crate::RcuVariable]s created with an executor hand the
/// destruction of superseded values to it instead of destroying them on the
/// writer's thread.
/// Any closure `Fn(Task) + Send + Sync` is an executor, which makes bridging
/// arbitrary runtimes a one-liner.
pub trait Executor: Send + Sync {
    /// Runs `task` at some point in the future.
    ///
    /// The task must eventually be run (or dropped) in order for containers
    /// waiting on their outstanding destructions to make progress.
    fn spawn_detached(&self, task: Task);
}

/********** blanket impl for closures *************************************************************/

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync,
{
    #[inline]
    fn spawn_detached(&self, task: Task) {
        (self)(task)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ThreadExecutor
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An [`Executor`] running every task on a freshly spawned OS thread.
#[derive(Copy, Clone, Default)]
pub struct ThreadExecutor;

/********** impl Executor *************************************************************************/

impl Executor for ThreadExecutor {
    #[inline]
    fn spawn_detached(&self, task: Task) {
        // the task is moved into a cell so it can be recovered if spawning fails
        let cell = Arc::new(Mutex::new(Some(task)));
        let inner = Arc::clone(&cell);
        let res = thread::Builder::new().name("rcu-reclaim".into()).spawn(move || {
            if let Some(task) = inner.lock().ok().and_then(|mut task| task.take()) {
                task();
            }
        });

        if let Err(err) = res {
            warn!("failed to spawn reclamation thread ({}), running task inline", err);
            if let Some(task) = cell.lock().ok().and_then(|mut task| task.take()) {
                task();
            }
        }
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for ThreadExecutor {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ThreadExecutor")
    }
}
