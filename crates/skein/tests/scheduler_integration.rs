//! Integration tests for the worker pool and task lifecycle

mod common;

use rand::seq::SliceRandom;
use skein::scheduler::MAX_WORKERS;
use skein::{when_all, Scheduler, TaskOptions, WorkerId, WorkerPhase};
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Panic payload used to check payloads survive the trip through a future
#[derive(Debug, PartialEq)]
struct ExpectedFailure(u32);

#[test]
fn test_single_task_runs_once() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();

    let result = common::scheduler(2)
        .start(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            0
        })
        .join();

    assert_eq!(result.unwrap(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_primary_result_is_returned() {
    let result = common::scheduler(1).start(|_| 42).join();
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn test_yield_resumes_task() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();

    common::scheduler(2)
        .start(move |cx| {
            seen.fetch_add(1, Ordering::SeqCst);
            cx.yield_now();
            seen.fetch_add(1, Ordering::SeqCst);
            0
        })
        .join()
        .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_join_waits_for_every_child() {
    const CHILDREN: usize = 32;
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();

    let mut scheduler = common::scheduler(4);
    let result = scheduler
        .start(move |cx| {
            for _ in 0..CHILDREN {
                let seen = seen.clone();
                // Results are dropped: the primary returns before its children finish.
                let _ = cx.spawn(move |cx| {
                    cx.yield_now();
                    cx.yield_now();
                    seen.fetch_add(1, Ordering::SeqCst);
                });
            }
            0
        })
        .join();

    assert_eq!(result.unwrap(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), CHILDREN);

    let stats = scheduler.stats();
    assert_eq!(stats.tasks_spawned, CHILDREN as u64 + 1);
    assert_eq!(stats.tasks_completed, CHILDREN as u64 + 1);
    assert_eq!(stats.active_tasks, 0);
}

#[test]
fn test_nested_spawns_complete() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();

    common::scheduler(3)
        .start(move |cx| {
            let outer: Vec<_> = (0..4)
                .map(|_| {
                    let seen = seen.clone();
                    cx.spawn(move |cx| {
                        let inner: Vec<_> = (0..4)
                            .map(|_| {
                                let seen = seen.clone();
                                cx.spawn(move |_| {
                                    seen.fetch_add(1, Ordering::SeqCst);
                                })
                            })
                            .collect();
                        for future in inner {
                            future.get(cx).unwrap();
                        }
                    })
                })
                .collect();

            for future in outer {
                future.get(cx).unwrap();
            }
            0
        })
        .join()
        .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 16);
}

#[test]
fn test_child_panic_before_it_runs() {
    let result = common::scheduler(1)
        .start(|cx| {
            let local = 5;
            let child = cx.spawn(|_| -> i32 { panic::panic_any(ExpectedFailure(7)) });

            // Single worker: the child has not run yet when `get` parks us.
            let err = child.get(cx).unwrap_err();
            let payload = err.into_panic().downcast::<ExpectedFailure>().unwrap();
            assert_eq!(*payload, ExpectedFailure(7));
            local
        })
        .join();

    assert_eq!(result.unwrap(), 5);
}

#[test]
fn test_child_panic_after_it_ran() {
    let result = common::scheduler(2)
        .start(|cx| {
            let local = 9;
            let child = cx.spawn(|_| -> i32 { panic::panic_any(ExpectedFailure(11)) });

            while !child.is_ready() {
                cx.yield_now();
            }
            let err = child.get(cx).unwrap_err();
            let payload = err.into_panic().downcast::<ExpectedFailure>().unwrap();
            assert_eq!(*payload, ExpectedFailure(11));
            local
        })
        .join();

    assert_eq!(result.unwrap(), 9);
}

#[test]
fn test_primary_panic_is_reported_by_join() {
    let err = common::scheduler(2)
        .start(|_| panic!("primary failed"))
        .join()
        .unwrap_err();

    assert_eq!(err.message(), Some("primary failed"));
}

#[test]
fn test_pinned_tasks_run_on_their_worker() {
    const WORKERS: usize = 4;

    common::scheduler(WORKERS)
        .start(|cx| {
            let futures: Vec<_> = (1..=WORKERS as WorkerId)
                .map(|worker| {
                    cx.spawn_with(TaskOptions::new().pinned(worker), move |cx| {
                        let first = cx.worker_id();
                        cx.yield_now();
                        (worker, first, cx.worker_id())
                    })
                })
                .collect();

            for future in futures {
                let (pinned, first, after_yield) = future.get(cx).unwrap();
                assert_eq!(first, pinned);
                assert_eq!(after_yield, pinned);
            }
            0
        })
        .join()
        .unwrap();
}

#[test]
fn test_random_affinity_permutation_with_when_all() {
    const WORKERS: usize = 6;
    let mut workers: Vec<WorkerId> = (1..=WORKERS as WorkerId).collect();
    workers.shuffle(&mut rand::thread_rng());

    common::scheduler(WORKERS)
        .start(move |cx| {
            let futures: Vec<_> = workers
                .iter()
                .map(|&worker| {
                    cx.spawn_with(TaskOptions::new().pinned(worker), |cx| cx.worker_id())
                })
                .collect();

            let all = when_all(cx, futures).get(cx).unwrap();
            assert_eq!(all.len(), WORKERS);
            for (future, &worker) in all.into_iter().zip(&workers) {
                assert!(future.is_ready());
                assert_eq!(future.get(cx).unwrap(), worker);
            }
            0
        })
        .join()
        .unwrap();
}

#[test]
fn test_affinity_round_trip() {
    common::scheduler(3)
        .start(|cx| {
            assert_eq!(cx.worker_affinity(), skein::scheduler::affinity_for(1));

            cx.set_worker_affinity(0b110);
            assert_eq!(cx.worker_affinity(), 0b110);
            assert_eq!(cx.current_task().worker_affinity(), 0b110);
            assert_eq!(cx.current_task().id(), cx.task_id());

            // Takes effect at the next requeue.
            cx.yield_now();
            assert!(cx.worker_id() == 2 || cx.worker_id() == 3);

            let handle = cx.current_task();
            handle.set_worker_affinity(0b1);
            cx.yield_now();
            assert_eq!(cx.worker_id(), 1);
            0
        })
        .join()
        .unwrap();
}

#[test]
#[should_panic(expected = "selects no worker")]
fn test_spawn_with_unusable_affinity_panics() {
    let result = common::scheduler(2)
        .start(|cx| {
            let _ = cx.spawn_with(TaskOptions::new().worker_affinity(0b100), |_| ());
            0
        })
        .join();

    if let Err(err) = result {
        panic::resume_unwind(err.into_panic());
    }
}

#[test]
#[should_panic(expected = "selects no worker")]
fn test_handle_with_unusable_affinity_panics() {
    let result = common::scheduler(2)
        .start(|cx| {
            cx.current_task().set_worker_affinity(0b100);
            cx.yield_now();
            0
        })
        .join();

    if let Err(err) = result {
        panic::resume_unwind(err.into_panic());
    }
}

#[test]
fn test_handle_moves_affinity_from_another_task() {
    common::scheduler(2)
        .start(|cx| {
            let handle = cx.current_task();
            cx.spawn(move |_| handle.set_worker_affinity(0b10))
                .get(cx)
                .unwrap();
            assert_eq!(cx.worker_affinity(), 0b10);

            cx.yield_now();
            assert_eq!(cx.worker_id(), 2);
            0
        })
        .join()
        .unwrap();
}

#[test]
fn test_autodetected_worker_count() {
    let mut scheduler = Scheduler::new();
    let count = scheduler.num_workers(0).worker_count();
    assert!(count >= 1);
    assert!(count <= num_cpus::get().max(1));
    assert!(count <= MAX_WORKERS);

    let reported = scheduler.start(|cx| cx.num_workers() as i32).join().unwrap();
    assert_eq!(reported as usize, count);
}

#[test]
#[should_panic(expected = "already running")]
fn test_starting_running_pool_panics() {
    let mut scheduler = common::scheduler(1);
    scheduler.start(|_| 0);
    scheduler.start(|_| 0);
}

#[test]
fn test_worker_phases_after_join() {
    let mut scheduler = common::scheduler(3);
    scheduler.start(|_| 0).join().unwrap();

    assert!(!scheduler.is_running());
    assert_eq!(scheduler.worker_phases(), vec![WorkerPhase::Stopped; 3]);
}

#[test]
fn test_task_ids_are_unique_and_increasing() {
    common::scheduler(2)
        .start(|cx| {
            let parent = cx.task_id();
            let first = cx.spawn(|cx| cx.task_id()).get(cx).unwrap();
            let second = cx.spawn(|cx| cx.task_id()).get(cx).unwrap();
            assert!(parent < first);
            assert!(first < second);
            0
        })
        .join()
        .unwrap();
}
