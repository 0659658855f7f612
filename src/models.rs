//! Core data structures shared by the scheduler, sampler, aggregator and scorer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result produced by a single workload invocation. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metric {
    /// Absolute count (e.g. primes found, blocks verified)
    Counter { value: u64, unit: String },
    /// Throughput (ops/sec, GB/s, GFLOPS)
    Rate { value: f64, unit: String },
    /// Plain pass/fail outcome
    Success { passed: bool },
}

impl Metric {
    pub fn counter(value: u64, unit: impl Into<String>) -> Self {
        Metric::Counter {
            value,
            unit: unit.into(),
        }
    }

    pub fn rate(value: f64, unit: impl Into<String>) -> Self {
        Metric::Rate {
            value,
            unit: unit.into(),
        }
    }

    pub fn success(passed: bool) -> Self {
        Metric::Success { passed }
    }

    /// Numeric value for counter and rate metrics.
    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Counter { value, .. } => Some(*value as f64),
            Metric::Rate { value, .. } => Some(*value),
            Metric::Success { .. } => None,
        }
    }

    /// Only an explicit `Success { passed: false }` counts as a failed run.
    pub fn is_success(&self) -> bool {
        match self {
            Metric::Success { passed } => *passed,
            _ => true,
        }
    }

    /// Achieved fraction of `baseline`, higher is better.
    ///
    /// Boolean metrics map to 1.0 / 0.0. A non-positive baseline cannot be
    /// compared against, so any successful run counts as fully achieved.
    pub fn ratio_to(&self, baseline: f64) -> f64 {
        match self.value() {
            Some(_) if baseline <= 0.0 => 1.0,
            Some(value) => (value / baseline).max(0.0),
            None => {
                if self.is_success() {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Counter { value, unit } => write!(f, "{} {}", value, unit),
            Metric::Rate { value, unit } => write!(f, "{:.2} {}", value, unit),
            Metric::Success { passed } => write!(f, "{}", if *passed { "pass" } else { "fail" }),
        }
    }
}

/// How the workloads of a phase are launched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Workloads run one after another
    #[default]
    Sequential,
    /// Workloads run concurrently, together with adjacent parallel phases
    Parallel,
}

/// How a phase's sub-score is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringRule {
    /// Tiered metric-vs-baseline ratio
    Ratio,
    /// 100 when every run passed, else 0
    PassFail,
    /// Derived from throttle event count
    Thermal,
}

impl ScoringRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringRule::Ratio => "ratio",
            ScoringRule::PassFail => "pass_fail",
            ScoringRule::Thermal => "thermal",
        }
    }
}

/// One telemetry reading from the target.
///
/// Every reading is optional: a sensor that cannot be read leaves its field
/// `None` instead of reporting 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    /// Hottest valid thermal zone in Celsius
    pub temperature_c: Option<f64>,
    /// All valid thermal zone readings in Celsius
    #[serde(default)]
    pub zone_temperatures_c: Vec<f64>,
    /// Mean current clock frequency across reporting cores
    pub frequency_mhz: Option<f64>,
    /// CPU utilization percentage (0-100)
    pub utilization_pct: Option<f64>,
}

impl TelemetrySample {
    /// A sample slot for which nothing could be read.
    pub fn missing(timestamp: DateTime<Utc>) -> Self {
        TelemetrySample {
            timestamp,
            temperature_c: None,
            zone_temperatures_c: Vec::new(),
            frequency_mhz: None,
            utilization_pct: None,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.temperature_c.is_none() && self.frequency_mhz.is_none() && self.utilization_pct.is_none()
    }
}

/// A detected frequency drop under heat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThrottleEvent {
    pub timestamp: DateTime<Utc>,
    /// Frequency drop relative to the last valid reading, in percent
    pub drop_percent: f64,
    pub previous_frequency_mhz: f64,
    pub frequency_mhz: f64,
    pub temperature_c: f64,
}

/// A metric together with the workload that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub workload: String,
    pub metric: Metric,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Failure,
    Timeout,
    Cancelled,
}

/// Why a run was counted as failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub workload: String,
    pub kind: FailureKind,
    pub message: String,
}

/// A non-fatal observation that counts toward the warning penalty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WarningRecord {
    /// Phase name, or a component tag such as "telemetry" or "ecc"
    pub scope: String,
    pub message: String,
}

/// Aggregated outcome of one phase.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub pass_count: u64,
    pub fail_count: u64,
    pub metrics: Vec<MetricRecord>,
    pub failures: Vec<FailureRecord>,
}

impl PhaseResult {
    pub fn total_runs(&self) -> u64 {
        self.pass_count + self.fail_count
    }
}
