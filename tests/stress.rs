use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use hazard_rcu::{init_config, ConfigBuilder, RcuVariable, RemovableQueue};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
    // small local free lists push blocks through the global tier more often
    let _ = init_config(ConfigBuilder::new().local_free_list(2).retire_cache(0).build());
}

#[test]
fn remove_races_pop_exactly_once() {
    init();

    const ROUNDS: usize = 200;
    const ITEMS: usize = 64;

    for _ in 0..ROUNDS {
        let queue = Arc::new(RemovableQueue::new());
        let mut handles: Vec<_> = (0..ITEMS).map(|i| (i, queue.push(i))).collect();
        handles.shuffle(&mut thread_rng());

        let barrier = Arc::new(Barrier::new(3));
        let popper = {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                std::iter::from_fn(|| queue.try_pop()).collect::<Vec<_>>()
            })
        };

        let (first, second) = handles.split_at(ITEMS / 2);
        let removers: Vec<_> = vec![first.to_vec(), second.to_vec()]
            .into_iter()
            .map(|handles| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut removed = Vec::new();
                    for (expected, handle) in handles {
                        if let Some(value) = queue.remove(&handle) {
                            assert_eq!(value, expected);
                            removed.push(value);
                        }
                    }

                    removed
                })
            })
            .collect();

        let mut seen = popper.join().unwrap();
        for remover in removers {
            seen.extend(remover.join().unwrap());
        }

        // whatever is left was skipped by the popper while a removal was in flight
        seen.extend(std::iter::from_fn(|| queue.try_pop()));

        assert_eq!(seen.len(), ITEMS, "an element was delivered twice or lost");
        let unique: HashSet<_> = seen.into_iter().collect();
        assert_eq!(unique, (0..ITEMS).collect::<HashSet<_>>());
        assert!(queue.is_empty());
    }
}

#[test]
fn remove_races_pop_with_refills() {
    init();

    const THREADS: usize = 4;
    const OPS: usize = 5_000;

    let queue = Arc::new(RemovableQueue::new());
    let pushed = Arc::new(AtomicUsize::new(0));
    let consumed = Arc::new(AtomicUsize::new(0));
    let handles = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..THREADS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            let consumed = Arc::clone(&consumed);
            let handles = Arc::clone(&handles);
            thread::spawn(move || {
                let mut rng = thread_rng();
                for i in 0..OPS {
                    match rng.gen_range(0..3) {
                        0 => {
                            let handle = queue.push((id, i));
                            pushed.fetch_add(1, Ordering::Relaxed);
                            handles.lock().unwrap().push(handle);
                        }
                        1 => {
                            if queue.try_pop().is_some() {
                                consumed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        _ => {
                            let handle = {
                                let mut handles = handles.lock().unwrap();
                                if handles.is_empty() {
                                    continue;
                                }

                                let idx = rng.gen_range(0..handles.len());
                                handles.swap_remove(idx)
                            };

                            if queue.remove(&handle).is_some() {
                                consumed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let remaining = std::iter::from_fn(|| queue.try_pop()).count();
    assert_eq!(consumed.load(Ordering::Relaxed) + remaining, pushed.load(Ordering::Relaxed));
    assert!(queue.is_empty());
}

#[test]
fn mpmc_delivers_everything_once() {
    init();

    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 10_000;

    let queue = Arc::new(RemovableQueue::new());
    let done = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let _ = queue.push(id * PER_PRODUCER + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut popped = Vec::new();
                loop {
                    match queue.try_pop() {
                        Some(value) => popped.push(value),
                        None if done.load(Ordering::Acquire) => break,
                        None => thread::yield_now(),
                    }
                }

                popped
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    done.store(true, Ordering::Release);

    let mut seen = HashSet::new();
    for consumer in consumers {
        let popped = consumer.join().unwrap();
        // elements of a single producer are never reordered by more than a segment
        let mut last = vec![None; PRODUCERS];
        for value in popped {
            let producer = value / PER_PRODUCER;
            if let Some(prev) = last[producer] {
                assert!(value + SEGMENT_SLACK > prev, "{} popped long after {}", value, prev);
            }

            last[producer] = Some(value);
            assert!(seen.insert(value), "{} delivered twice", value);
        }
    }

    seen.extend(std::iter::from_fn(|| queue.try_pop()));
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
}

/// Segment size plus concurrent producers' interleaving.
const SEGMENT_SLACK: usize = hazard_rcu::SEGMENT_SIZE * 4;

#[test]
fn rcu_readers_under_destructive_writes() {
    init();

    const READERS: usize = 4;
    const WRITES: usize = 5_000;

    let var = Arc::new(RcuVariable::new(vec![0usize; 16]));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let var = Arc::clone(&var);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = 0usize;
                while !done.load(Ordering::Relaxed) {
                    let snapshot = var.read();
                    // every published vector is uniform, a torn or freed one would not be
                    let first = snapshot[0];
                    assert!(snapshot.iter().all(|&value| value == first));
                    reads += 1;
                }

                reads
            })
        })
        .collect();

    let mut rng = thread_rng();
    for i in 1..=WRITES {
        let len = rng.gen_range(1..64);
        if i % 2 == 0 {
            var.assign(vec![i; len]);
        } else {
            var.emplace(|| vec![i; len]);
        }
    }

    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(var.read()[0], WRITES);
}
