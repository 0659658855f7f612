//! Running a single workload under a deadline.
//!
//! Each workload runs as its own task with a private cancellation channel.
//! Past `allotment + workload_grace` the task is told to cancel (which reaches
//! the remote command as SIGTERM), gets `cancel_grace` to wind down and is
//! then aborted. Every outcome except a fatal error ends up in the
//! `ResultAggregator`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, timeout, Instant};

use crate::aggregator::ResultAggregator;
use crate::error::{HarnessError, Result};
use crate::models::{FailureKind, FailureRecord, Metric};
use crate::target::{wait_cancelled, CancelRx, RemoteExecutor};
use crate::workload::{Workload, WorkloadContext};

/// One invocation of one workload.
#[derive(Clone)]
pub struct WorkloadRun {
    pub phase: String,
    pub workload: Arc<dyn Workload>,
    pub instance: u32,
    pub allotment: Duration,
}

/// Deadlines applied past a workload's allotment.
///
/// A workload that ignores its deadline runs for up to
/// `allotment + workload_grace + cancel_grace` before its task is aborted.
/// Allotments sum to the session's `total_duration`, so a session can end
/// later than that by up to [`ExecutionLimits::max_overrun`] per sequential
/// workload. Parallel workloads overrun together, once per group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Extra time past the allotment before cancellation
    pub workload_grace: Duration,
    /// Time a cancelled workload gets before its task is aborted
    pub cancel_grace: Duration,
}

impl ExecutionLimits {
    /// Longest a single workload can run past its allotment.
    pub fn max_overrun(&self) -> Duration {
        self.workload_grace + self.cancel_grace
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadOutcome {
    Passed,
    Failed,
    TimedOut,
    /// Stopped because the session is aborting; nothing recorded
    Cancelled,
    /// Target lost; the session must abort
    Fatal(HarnessError),
}

enum Finish {
    Done(std::result::Result<Result<Metric>, JoinError>),
    Deadline,
    Aborted,
}

async fn stop_task(
    name: &str,
    mut handle: JoinHandle<Result<Metric>>,
    cancel_tx: &watch::Sender<bool>,
    grace: Duration,
) {
    cancel_tx.send_replace(true);
    if timeout(grace, &mut handle).await.is_err() {
        log::warn!(
            "[Scheduler] Workload '{}' ignored cancellation for {:?}, aborting task",
            name,
            grace
        );
        handle.abort();
    }
}

fn failure(workload: &str, kind: FailureKind, message: impl Into<String>) -> FailureRecord {
    FailureRecord {
        workload: workload.to_string(),
        kind,
        message: message.into(),
    }
}

/// Run `run` to completion, deadline or session abort and record the result.
pub async fn run_workload(
    executor: Arc<dyn RemoteExecutor>,
    run: WorkloadRun,
    limits: ExecutionLimits,
    aggregator: &ResultAggregator,
    mut abort: CancelRx,
) -> WorkloadOutcome {
    let name = run.workload.name().to_string();
    let phase = run.phase.as_str();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let deadline = Instant::now() + run.allotment + limits.workload_grace;

    let ctx = WorkloadContext {
        executor,
        phase: run.phase.clone(),
        instance: run.instance,
        duration: run.allotment,
        deadline,
        cancel: cancel_rx,
    };
    log::debug!(
        "[Scheduler] Starting '{}' in '{}' for {:?}",
        name,
        phase,
        run.allotment
    );
    let mut handle = tokio::spawn(run.workload.run(ctx));

    let finish = tokio::select! {
        biased;
        joined = &mut handle => Finish::Done(joined),
        _ = sleep_until(deadline) => Finish::Deadline,
        _ = wait_cancelled(&mut abort) => Finish::Aborted,
    };

    match finish {
        Finish::Done(Ok(Ok(metric))) => {
            let passed = metric.is_success();
            log::info!("[Scheduler] '{}' finished: {}", name, metric);
            aggregator.record_metric(phase, &name, metric);
            if passed {
                aggregator.record_pass(phase);
                WorkloadOutcome::Passed
            } else {
                aggregator.record_fail(
                    phase,
                    failure(&name, FailureKind::Failure, "workload reported failure"),
                );
                WorkloadOutcome::Failed
            }
        }
        Finish::Done(Ok(Err(err))) if err.is_fatal() => {
            log::error!("[Scheduler] '{}' lost the target: {}", name, err);
            WorkloadOutcome::Fatal(err)
        }
        Finish::Done(Ok(Err(err))) => {
            let (kind, outcome) = match err {
                HarnessError::WorkloadTimeout { .. } => (FailureKind::Timeout, WorkloadOutcome::TimedOut),
                HarnessError::Cancelled { .. } => (FailureKind::Cancelled, WorkloadOutcome::Failed),
                _ => (FailureKind::Failure, WorkloadOutcome::Failed),
            };
            log::warn!("[Scheduler] {}", err);
            aggregator.record_fail(phase, failure(&name, kind, err.to_string()));
            outcome
        }
        Finish::Done(Err(join_err)) => {
            let reason = if join_err.is_panic() {
                "workload panicked".to_string()
            } else {
                join_err.to_string()
            };
            let err = HarnessError::WorkloadFailure {
                workload: name.clone(),
                reason,
            };
            log::error!("[Scheduler] {}", err);
            aggregator.record_fail(phase, failure(&name, FailureKind::Failure, err.to_string()));
            WorkloadOutcome::Failed
        }
        Finish::Deadline => {
            let err = HarnessError::WorkloadTimeout {
                workload: name.clone(),
                allotted: run.allotment,
            };
            log::warn!("[Scheduler] {}, cancelling", err);
            stop_task(&name, handle, &cancel_tx, limits.cancel_grace).await;
            aggregator.record_fail(phase, failure(&name, FailureKind::Timeout, err.to_string()));
            WorkloadOutcome::TimedOut
        }
        Finish::Aborted => {
            log::debug!("[Scheduler] Session aborting, cancelling '{}'", name);
            stop_task(&name, handle, &cancel_tx, limits.cancel_grace).await;
            WorkloadOutcome::Cancelled
        }
    }
}
