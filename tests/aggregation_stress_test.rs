//! Concurrent result aggregation
//!
//! Regression tests for lost updates: many tasks hammering the same phase
//! counters must add up exactly, and snapshots taken mid-flight must never
//! show a torn update.

use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use goatd_validator::{FailureKind, FailureRecord, Metric, ResultAggregator};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_record_pass_loses_nothing() {
    const TASKS: u64 = 64;
    const PER_TASK: u64 = 1_000;

    let aggregator = ResultAggregator::new();
    let handles: Vec<_> = (0..TASKS)
        .map(|t| {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                for i in 0..PER_TASK {
                    aggregator.record_pass("multi_core");
                    if i % 100 == 0 {
                        aggregator.record_metric(
                            "multi_core",
                            &format!("worker#{}", t),
                            Metric::counter(i, "iterations"),
                        );
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let result = aggregator.snapshot().phase("multi_core");
    assert_eq!(result.pass_count, TASKS * PER_TASK);
    assert_eq!(result.metrics.len() as u64, TASKS * (PER_TASK / 100));
}

#[test]
fn snapshot_never_sees_torn_pass_fail_pairs() {
    // writers record a pass then a fail; at any instant each writer owes at most one fail
    const WRITERS: u64 = 4;
    const PAIRS: u64 = 1_000;

    let aggregator = ResultAggregator::new();
    let done = Arc::new(AtomicBool::new(false));

    std::thread::scope(|scope| {
        let reader = {
            let aggregator = aggregator.clone();
            let done = done.clone();
            scope.spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let result = aggregator.snapshot().phase("pattern");
                    assert_eq!(result.fail_count, result.failures.len() as u64);
                    assert!(result.pass_count >= result.fail_count);
                    assert!(result.pass_count - result.fail_count <= WRITERS);
                }
            })
        };
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let aggregator = aggregator.clone();
                scope.spawn(move || {
                    for _ in 0..PAIRS {
                        aggregator.record_pass("pattern");
                        aggregator.record_fail(
                            "pattern",
                            FailureRecord {
                                workload: "ram".to_string(),
                                kind: FailureKind::Failure,
                                message: "bit flip".to_string(),
                            },
                        );
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();
    });

    let result = aggregator.snapshot().phase("pattern");
    assert_eq!(result.pass_count, WRITERS * PAIRS);
    assert_eq!(result.fail_count, WRITERS * PAIRS);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pass_count_is_tasks_times_iterations(tasks in 1usize..16, per_task in 1u64..500) {
        let aggregator = ResultAggregator::new();
        std::thread::scope(|scope| {
            for _ in 0..tasks {
                let aggregator = aggregator.clone();
                scope.spawn(move || {
                    for _ in 0..per_task {
                        aggregator.record_pass("single_core");
                    }
                });
            }
        });
        prop_assert_eq!(
            aggregator.snapshot().phase("single_core").pass_count,
            tasks as u64 * per_task
        );
    }
}
