//! Concurrency-safe result sink.
//!
//! Workloads, the telemetry sampler and the throttle detector all report into a
//! single `ResultAggregator`. Every mutation takes the same lock, so increments
//! from concurrent tasks are never lost, and `snapshot()` copies the whole state
//! under that lock so callers never observe a partially-applied update.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{
    FailureRecord, Metric, MetricRecord, PhaseResult, TelemetrySample, ThrottleEvent,
    WarningRecord,
};

#[derive(Debug, Default)]
struct AggregatorState {
    phases: BTreeMap<String, PhaseResult>,
    telemetry: Vec<TelemetrySample>,
    throttle_events: Vec<ThrottleEvent>,
    warnings: Vec<WarningRecord>,
}

impl AggregatorState {
    fn phase_mut(&mut self, phase: &str) -> &mut PhaseResult {
        self.phases.entry(phase.to_string()).or_default()
    }
}

/// Point-in-time copy of everything the aggregator has collected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatorSnapshot {
    pub phases: BTreeMap<String, PhaseResult>,
    pub telemetry: Vec<TelemetrySample>,
    pub throttle_events: Vec<ThrottleEvent>,
    pub warnings: Vec<WarningRecord>,
}

impl AggregatorSnapshot {
    /// Result for `phase`, or an empty result if nothing was reported.
    pub fn phase(&self, phase: &str) -> PhaseResult {
        self.phases.get(phase).cloned().unwrap_or_default()
    }

    pub fn total_passes(&self) -> u64 {
        self.phases.values().map(|p| p.pass_count).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.phases.values().map(|p| p.fail_count).sum()
    }
}

/// Shared handle; clones refer to the same underlying state.
#[derive(Clone, Debug, Default)]
pub struct ResultAggregator {
    inner: Arc<Mutex<AggregatorState>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave a half-applied increment behind (each
    // mutation is a single statement), so a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `phase` appear in snapshots even if it never reports.
    pub fn register_phase(&self, phase: &str) {
        self.lock().phase_mut(phase);
    }

    pub fn record_pass(&self, phase: &str) {
        self.lock().phase_mut(phase).pass_count += 1;
    }

    pub fn record_fail(&self, phase: &str, failure: FailureRecord) {
        log::debug!(
            "[Aggregator] {} fail: {} ({:?}) {}",
            phase,
            failure.workload,
            failure.kind,
            failure.message
        );
        let mut state = self.lock();
        let result = state.phase_mut(phase);
        result.fail_count += 1;
        result.failures.push(failure);
    }

    pub fn record_metric(&self, phase: &str, workload: &str, metric: Metric) {
        self.lock().phase_mut(phase).metrics.push(MetricRecord {
            workload: workload.to_string(),
            metric,
        });
    }

    pub fn record_warning(&self, scope: &str, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[Aggregator] warning ({}): {}", scope, message);
        self.lock().warnings.push(WarningRecord {
            scope: scope.to_string(),
            message,
        });
    }

    pub fn record_sample(&self, sample: TelemetrySample) {
        self.lock().telemetry.push(sample);
    }

    pub fn record_throttle(&self, event: ThrottleEvent) {
        self.lock().throttle_events.push(event);
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        let state = self.lock();
        AggregatorSnapshot {
            phases: state.phases.clone(),
            telemetry: state.telemetry.clone(),
            throttle_events: state.throttle_events.clone(),
            warnings: state.warnings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;
    use std::thread;

    fn failure(workload: &str) -> FailureRecord {
        FailureRecord {
            workload: workload.to_string(),
            kind: FailureKind::Failure,
            message: "bad".to_string(),
        }
    }

    #[test]
    fn test_records_land_in_phase() {
        let agg = ResultAggregator::new();
        agg.record_pass("single_core");
        agg.record_pass("single_core");
        agg.record_fail("single_core", failure("prime"));
        agg.record_metric("single_core", "prime", Metric::rate(10.0, "ops/s"));

        let snap = agg.snapshot();
        let phase = snap.phase("single_core");
        assert_eq!(phase.pass_count, 2);
        assert_eq!(phase.fail_count, 1);
        assert_eq!(phase.metrics.len(), 1);
        assert_eq!(phase.failures[0].workload, "prime");
    }

    #[test]
    fn test_registered_phase_is_visible() {
        let agg = ResultAggregator::new();
        agg.register_phase("pattern");
        let snap = agg.snapshot();
        assert!(snap.phases.contains_key("pattern"));
        assert_eq!(snap.phase("pattern").total_runs(), 0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let agg = ResultAggregator::new();
        agg.record_pass("a");
        let before = agg.snapshot();
        agg.record_pass("a");
        assert_eq!(before.phase("a").pass_count, 1);
        assert_eq!(agg.snapshot().phase("a").pass_count, 2);
    }

    #[test]
    fn test_concurrent_threads_lose_no_updates() {
        let agg = ResultAggregator::new();
        let threads = 16;
        let per_thread = 2_000;

        thread::scope(|scope| {
            for t in 0..threads {
                let agg = agg.clone();
                scope.spawn(move || {
                    for i in 0..per_thread {
                        agg.record_pass("multi_core");
                        if i % 100 == 0 {
                            agg.record_fail("multi_core", failure(&format!("w{}", t)));
                        }
                    }
                });
            }
        });

        let phase = agg.snapshot().phase("multi_core");
        assert_eq!(phase.pass_count, (threads * per_thread) as u64);
        assert_eq!(phase.fail_count, (threads * per_thread / 100) as u64);
        assert_eq!(phase.failures.len() as u64, phase.fail_count);
    }
}
