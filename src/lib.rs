//! GOATd Validator
//!
//! Device validation harness: drives a hardware target through timed stress
//! phases, samples telemetry out-of-band for the whole session, and renders a
//! single pass/fail verdict from a weighted health score.
//!
//! **Architecture**: `PhaseScheduler` owns the session. It starts the
//! `TelemetrySampler` (which feeds the `ThrottleDetector`), runs each phase's
//! workloads through a `RemoteExecutor`, and funnels every pass, fail, metric,
//! sample and throttle event into one `ResultAggregator`. At the end the
//! `HealthScorer` turns the aggregator snapshot into a `ScoreCard`.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Metrics, telemetry samples and per-phase results
//! - **config**: Harness configuration, loading and validation
//! - **target**: Remote execution boundary (shell/ssh and scripted executors)
//! - **workload**: Pluggable workloads and the phase registry
//! - **telemetry**: Probe parsing, sampling, throttle detection, ECC
//! - **aggregator**: Concurrency-safe result sink
//! - **scoring**: Weighted sub-scores, penalties and the verdict
//! - **session**: Resolved phase list and settings for one run
//! - **orchestrator**: Budget allocation, workload execution, phase scheduling
//! - **report**: Final hand-off to report renderers

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;

// Robust, decoupled logging system
pub mod log_collector;

pub mod target;
pub mod workload;
pub mod telemetry;
pub mod aggregator;
pub mod scoring;
pub mod session;
pub mod orchestrator;
pub mod report;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ConfigError, ExecError, HarnessError, Result};

pub use models::{
    ExecutionMode, FailureKind, FailureRecord, Metric, MetricRecord, PhaseResult, ScoringRule,
    TelemetrySample, ThrottleEvent, WarningRecord,
};

pub use config::{HarnessConfig, Thresholds};

pub use target::{CommandOutput, RemoteExecutor, ScriptedExecutor, ScriptedResponse, ShellExecutor};

pub use workload::{CommandWorkload, FnWorkload, Workload, WorkloadContext, WorkloadRegistry};

pub use telemetry::{TelemetrySampler, TelemetrySummary, ThrottleDetector};

pub use aggregator::{AggregatorSnapshot, ResultAggregator};

pub use scoring::{HealthScorer, HealthStatus, PhaseScoring, ScoreCard, Verdict};

pub use session::{Phase, Session, SessionSettings};

pub use orchestrator::{PhaseScheduler, SessionState};

pub use report::SessionReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_error_reexport() {
        let _: Result<i32> = Ok(42);
    }

    #[test]
    fn test_models_reexport() {
        let _metric = Metric::counter(1, "primes");
        assert_eq!(ExecutionMode::default(), ExecutionMode::Sequential);
        assert_eq!(Verdict::Passed.exit_code(), 0);
    }
}
