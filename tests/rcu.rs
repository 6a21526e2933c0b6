use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use hazard_rcu::{RcuVariable, Task, ThreadExecutor};

use matches::assert_matches;

struct DropCount(Arc<AtomicUsize>);
impl Drop for DropCount {
    #[inline]
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn snapshot_survives_assign() {
    let var = RcuVariable::new(10);
    let before = var.read();

    var.assign(20);
    assert_eq!(*var.read(), 20);
    assert_eq!(*before, 10);

    let copy = before.clone();
    drop(before);
    assert_eq!(*copy, 10);
    assert_eq!(var.read_copy(), 20);
}

#[test]
fn snapshot_on_other_thread() {
    let var = Arc::new(RcuVariable::new(String::from("initial")));
    let barrier = Arc::new(Barrier::new(2));

    let reader = {
        let var = Arc::clone(&var);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let snapshot = var.read();
            barrier.wait();
            barrier.wait();
            assert_eq!(*snapshot, "initial");
        })
    };

    barrier.wait();
    var.assign(String::from("updated"));
    barrier.wait();

    reader.join().unwrap();
    assert_eq!(*var.read(), "updated");
}

#[test]
fn emplace_and_start_write_emplace() {
    let var = RcuVariable::new(vec![1, 2, 3]);
    var.emplace(|| vec![4]);
    assert_eq!(*var.read(), [4]);

    let mut write = var.start_write_emplace(Vec::new());
    write.push(5);
    write.commit();
    assert_eq!(*var.read(), [5]);
}

#[test]
fn writers_are_exclusive() {
    let var = RcuVariable::new(0u32);
    let write = var.start_write();
    assert_matches!(var.try_start_write(), None);
    drop(write);
    assert_matches!(var.try_start_write(), Some(_));

    // concurrent read-modify-write cycles must never lose an update
    const THREADS: usize = 4;
    const ITERS: u32 = 500;

    let var = Arc::new(RcuVariable::new(0u32));
    let active = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let var = Arc::clone(&var);
            let active = Arc::clone(&active);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    let mut write = var.start_write();
                    assert!(!active.swap(true, Ordering::Relaxed), "two writers active");
                    *write += 1;
                    active.store(false, Ordering::Relaxed);
                    write.commit();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*var.read(), THREADS as u32 * ITERS);
}

#[test]
fn cleanup_never_blocks() {
    let drops = Arc::new(AtomicUsize::new(0));
    let var = RcuVariable::new(DropCount(Arc::clone(&drops)));

    let snapshot = var.read();
    var.assign(DropCount(Arc::clone(&drops)));
    drop(snapshot);

    // an active writer turns cleanup into a no-op
    let write = var.start_write_emplace(DropCount(Arc::clone(&drops)));
    var.cleanup();
    assert_eq!(drops.load(Ordering::Relaxed), 0);

    // discarding the write drops its private value
    drop(write);
    assert_eq!(drops.load(Ordering::Relaxed), 1);

    var.cleanup();
    assert_eq!(drops.load(Ordering::Relaxed), 2);
}

#[test]
fn deferred_drop_waits_for_executor() {
    init_logger();

    let (tx, rx) = mpsc::channel::<Task>();
    let tx = Mutex::new(tx);
    let drops = Arc::new(AtomicUsize::new(0));
    let var = RcuVariable::with_executor(DropCount(Arc::clone(&drops)), move |task: Task| {
        tx.lock().unwrap().send(task).unwrap();
    });

    var.assign(DropCount(Arc::clone(&drops)));
    var.assign(DropCount(Arc::clone(&drops)));
    assert_eq!(drops.load(Ordering::Relaxed), 0);

    // run the deferred destructions late on another thread, dropping the variable must wait
    let runner = {
        let drops = Arc::clone(&drops);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            for task in rx.iter().take(2) {
                task();
            }

            drops.load(Ordering::Relaxed)
        })
    };

    drop(var);
    assert_eq!(drops.load(Ordering::Relaxed), 3);
    assert!(runner.join().unwrap() >= 2);
}

#[test]
fn thread_executor_reclaims() {
    let drops = Arc::new(AtomicUsize::new(0));
    let var = RcuVariable::with_executor(DropCount(Arc::clone(&drops)), ThreadExecutor);
    for _ in 0..8 {
        var.assign(DropCount(Arc::clone(&drops)));
    }

    drop(var);
    assert_eq!(drops.load(Ordering::Relaxed), 9);
}

#[test]
fn concurrent_readers_and_writer() {
    const READERS: usize = 4;
    const WRITES: usize = 2_000;

    let drops = Arc::new(AtomicUsize::new(0));
    let var = Arc::new(RcuVariable::new((0usize, DropCount(Arc::clone(&drops)))));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let var = Arc::clone(&var);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0;
                while !done.load(Ordering::Relaxed) {
                    let snapshot = var.read();
                    let seen = snapshot.0;
                    // values are published in increasing order
                    assert!(seen >= last);
                    last = seen;

                    let held = snapshot.clone();
                    thread::yield_now();
                    assert_eq!(held.0, seen);
                }
            })
        })
        .collect();

    for i in 1..=WRITES {
        var.assign((i, DropCount(Arc::clone(&drops))));
    }

    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    var.cleanup();
    assert_eq!(drops.load(Ordering::Relaxed), WRITES);
    assert_eq!(var.read().0, WRITES);

    let var = Arc::try_unwrap(var).ok().unwrap();
    drop(var);
    assert_eq!(drops.load(Ordering::Relaxed), WRITES + 1);
}
