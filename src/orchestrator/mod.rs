//! Phase scheduling: drives a `Session` from connectivity check to score card.
//!
//! **Flow**:
//! 1. Check the target is reachable; if not, the session is Aborted
//! 2. Start the telemetry sampler (and ECC baseline) for the whole run
//! 3. Run phases in declaration order. Adjacent parallel phases form one
//!    group whose workloads all run concurrently; sequential phases run their
//!    workloads one after another, splitting the phase allotment evenly
//! 4. Stop the sampler, charge ECC and telemetry warnings, snapshot, score
//!
//! A workload failure or timeout never stops the session. Losing the target
//! cancels whatever is still running and aborts without a score.

pub mod budget;
pub mod executor;
pub mod state;

pub use budget::{allocate_budget, BudgetRequest};
pub use executor::{run_workload, ExecutionLimits, WorkloadOutcome, WorkloadRun};
pub use state::{SessionState, SessionTracker};

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;

use crate::aggregator::ResultAggregator;
use crate::error::HarnessError;
use crate::log_parsed;
use crate::report::SessionReport;
use crate::scoring::{HealthScorer, ScoreCard};
use crate::session::{Phase, Session};
use crate::target::RemoteExecutor;
use crate::telemetry::{
    EccDelta, EccMonitor, SamplerSettings, SamplerStats, TelemetrySampler, TelemetrySummary,
    ThrottleDetector,
};

/// Drives sessions against one target.
#[derive(Clone)]
pub struct PhaseScheduler {
    executor: Arc<dyn RemoteExecutor>,
}

/// Slices of the phase list that run one after another.
fn phase_groups(phases: &[Phase]) -> Vec<&[Phase]> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < phases.len() {
        let mut end = start + 1;
        if phases[start].is_parallel() {
            while end < phases.len() && phases[end].is_parallel() {
                end += 1;
            }
        }
        groups.push(&phases[start..end]);
        start = end;
    }
    groups
}

impl PhaseScheduler {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        PhaseScheduler { executor }
    }

    /// Run every phase of `session` and produce its report. Never fails:
    /// an unreachable target yields an Aborted report with an UNAVAILABLE card.
    pub async fn run(&self, mut session: Session) -> SessionReport {
        let aggregator = ResultAggregator::new();
        let settings = session.settings.clone();
        log_parsed!(
            "[Scheduler] Session on {}: {} phases, budget {:?}",
            session.target,
            session.phases.len(),
            session.total_duration
        );

        if let Err(e) = self.executor.check_connectivity(settings.connect_timeout).await {
            let err = HarnessError::ConnectivityFailure(e.to_string());
            return self.aborted(session, &aggregator, SamplerStats::default(), err);
        }
        if let Err(e) = session.tracker.transition_to(SessionState::Running) {
            log::warn!("[Scheduler] {}", e);
        }

        for phase in &session.phases {
            aggregator.register_phase(&phase.name);
        }

        let sampler = TelemetrySampler::start(
            self.executor.clone(),
            SamplerSettings::new(settings.sample_interval, settings.probe_command.clone()),
            ThrottleDetector::new(&settings.thresholds),
            aggregator.clone(),
        );

        let mut ecc = settings
            .ecc
            .as_ref()
            .map(|cfg| EccMonitor::new(cfg.command.clone(), cfg.phase.clone(), settings.connect_timeout));
        if let Some(monitor) = ecc.as_mut() {
            if !monitor.start(&*self.executor).await {
                ecc = None;
            }
        }

        let limits = ExecutionLimits {
            workload_grace: settings.workload_grace,
            cancel_grace: settings.cancel_grace,
        };
        log::debug!(
            "[Scheduler] each workload may overrun its allotment by up to {:?}",
            limits.max_overrun()
        );
        let (abort_tx, abort_rx) = watch::channel(false);

        for group in phase_groups(&session.phases) {
            let result = self
                .run_group(group, limits, &aggregator, &abort_tx, &abort_rx)
                .await;
            if let Err(fatal) = result {
                abort_tx.send_replace(true);
                let stats = sampler.stop().await;
                return self.aborted(session, &aggregator, stats, fatal);
            }
        }

        let stats = sampler.stop().await;
        let ecc_delta: Option<EccDelta> = match &ecc {
            Some(monitor) => monitor.finish(&*self.executor, &aggregator).await,
            None => None,
        };

        let interim = aggregator.snapshot();
        let telemetry = TelemetrySummary::compute(
            &interim.telemetry,
            interim.throttle_events.len(),
            &settings.thresholds,
        );
        for warning in telemetry.warnings(&settings.thresholds) {
            aggregator.record_warning("telemetry", warning);
        }

        let snapshot = aggregator.snapshot();
        let scorer = HealthScorer::new(session.scoring_table(), settings.thresholds.clone());
        let score_card = scorer.score(&snapshot, &telemetry);

        if let Err(e) = session.tracker.transition_to(SessionState::Scored) {
            log::warn!("[Scheduler] {}", e);
        }
        log_parsed!(
            "[Scheduler] {}: {} {:.1}/100 ({})",
            session.target,
            score_card.verdict,
            score_card.final_score,
            score_card.health
        );
        if !score_card.passed() && !score_card.responsible_phases.is_empty() {
            log_parsed!(
                "[Scheduler] Phases below 80: {}",
                score_card.responsible_phases.join(", ")
            );
        }

        SessionReport {
            target: session.target,
            started_at: session.tracker.started_at,
            ended_at: session.tracker.ended_at,
            state: session.tracker.state,
            score_card,
            snapshot,
            telemetry,
            sampler: stats,
            ecc: ecc_delta,
        }
    }

    /// Run one group to completion. `Err` carries the fatal error that
    /// ended it early.
    async fn run_group(
        &self,
        group: &[Phase],
        limits: ExecutionLimits,
        aggregator: &ResultAggregator,
        abort_tx: &watch::Sender<bool>,
        abort_rx: &watch::Receiver<bool>,
    ) -> Result<(), HarnessError> {
        for phase in group {
            log_parsed!(
                "[Scheduler] Phase '{}' started ({:?}, {} workloads, {:?})",
                phase.name,
                phase.mode,
                phase.workloads.len(),
                phase.allotment
            );
        }

        let mut fatal = None;
        if group.len() == 1 && !group[0].is_parallel() {
            let phase = &group[0];
            let slice = phase.allotment / phase.workloads.len().max(1) as u32;
            for (i, workload) in phase.workloads.iter().enumerate() {
                let run = WorkloadRun {
                    phase: phase.name.clone(),
                    workload: workload.clone(),
                    instance: i as u32,
                    allotment: slice,
                };
                let outcome =
                    run_workload(self.executor.clone(), run, limits, aggregator, abort_rx.clone())
                        .await;
                if let WorkloadOutcome::Fatal(err) = outcome {
                    fatal = Some(err);
                    break;
                }
            }
        } else {
            let tasks = group.iter().flat_map(|phase| {
                phase.workloads.iter().enumerate().map(move |(i, workload)| WorkloadRun {
                    phase: phase.name.clone(),
                    workload: workload.clone(),
                    instance: i as u32,
                    allotment: phase.allotment,
                })
            });
            let outcomes = join_all(tasks.map(|run| async move {
                let outcome =
                    run_workload(self.executor.clone(), run, limits, aggregator, abort_rx.clone())
                        .await;
                if matches!(outcome, WorkloadOutcome::Fatal(_)) {
                    // stop the rest of the group right away
                    abort_tx.send_replace(true);
                }
                outcome
            }))
            .await;
            fatal = outcomes.into_iter().find_map(|o| match o {
                WorkloadOutcome::Fatal(err) => Some(err),
                _ => None,
            });
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        let snapshot = aggregator.snapshot();
        for phase in group {
            let result = snapshot.phase(&phase.name);
            log_parsed!(
                "[Scheduler] Phase '{}' finished: {} passed, {} failed",
                phase.name,
                result.pass_count,
                result.fail_count
            );
        }
        Ok(())
    }

    fn aborted(
        &self,
        mut session: Session,
        aggregator: &ResultAggregator,
        sampler: SamplerStats,
        err: HarnessError,
    ) -> SessionReport {
        log_parsed!("[Scheduler] Session aborted: {}", err);
        if let Err(e) = session.tracker.abort(err.to_string()) {
            log::warn!("[Scheduler] {}", e);
        }
        let snapshot = aggregator.snapshot();
        let telemetry = TelemetrySummary::compute(
            &snapshot.telemetry,
            snapshot.throttle_events.len(),
            &session.settings.thresholds,
        );
        SessionReport {
            target: session.target,
            started_at: session.tracker.started_at,
            ended_at: session.tracker.ended_at,
            state: session.tracker.state,
            score_card: ScoreCard::unavailable(err.to_string()),
            snapshot,
            telemetry,
            sampler,
            ecc: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metric, ScoringRule};
    use crate::scoring::{HealthStatus, Verdict};
    use crate::session::SessionSettings;
    use crate::target::{ScriptedExecutor, ScriptedResponse};
    use crate::workload::{FnWorkload, Workload};
    use std::time::Duration;
    use tokio::time::Instant;

    fn ok(name: &str) -> Arc<dyn Workload> {
        Arc::new(FnWorkload::new(name, |_ctx| {
            Box::pin(async { Ok(Metric::success(true)) })
        }))
    }

    /// Sleeps for its full requested duration, then passes.
    fn sleeper(name: &str) -> Arc<dyn Workload> {
        Arc::new(FnWorkload::new(name, |ctx| {
            Box::pin(async move {
                tokio::time::sleep(ctx.duration).await;
                Ok(Metric::success(true))
            })
        }))
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            sample_interval: Duration::from_secs(5),
            min_phase: Duration::ZERO,
            workload_grace: Duration::from_secs(1),
            cancel_grace: Duration::from_secs(1),
            probe_command: "probe".to_string(),
            ..SessionSettings::default()
        }
    }

    fn probe_exec() -> ScriptedExecutor {
        ScriptedExecutor::new().on("probe", ScriptedResponse::output("freq_mhz=2000\ntemp_c=55\n"))
    }

    #[test]
    fn test_phase_groups_merge_adjacent_parallel_phases() {
        let phases = vec![
            Phase::new("a", 25.0, ScoringRule::PassFail),
            Phase::new("b", 25.0, ScoringRule::PassFail).parallel(),
            Phase::new("c", 25.0, ScoringRule::PassFail).parallel(),
            Phase::new("d", 25.0, ScoringRule::PassFail),
        ];
        let groups: Vec<Vec<&str>> = phase_groups(&phases)
            .iter()
            .map(|g| g.iter().map(|p| p.name.as_str()).collect())
            .collect();
        assert_eq!(groups, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_group_runs_concurrently() {
        let session = Session::new(
            "dut",
            Duration::from_secs(100),
            vec![
                Phase::new("multi_core", 50.0, ScoringRule::PassFail)
                    .share(50.0)
                    .parallel()
                    .workload(sleeper("a"))
                    .workload(sleeper("b")),
                Phase::new("per_unit", 50.0, ScoringRule::PassFail)
                    .share(50.0)
                    .parallel()
                    .workload(sleeper("c")),
            ],
            settings(),
        )
        .unwrap();

        let started = Instant::now();
        let report = PhaseScheduler::new(Arc::new(probe_exec())).run(session).await;

        // both phases share the same 50s window
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(report.state, SessionState::Scored);
        assert_eq!(report.snapshot.total_passes(), 3);
        assert_eq!(report.score_card.verdict, Verdict::Passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_phase_splits_allotment() {
        let session = Session::new(
            "dut",
            Duration::from_secs(90),
            vec![Phase::new("single_core", 100.0, ScoringRule::PassFail)
                .share(100.0)
                .workload(sleeper("a"))
                .workload(sleeper("b"))
                .workload(sleeper("c"))],
            settings(),
        )
        .unwrap();

        let started = Instant::now();
        let report = PhaseScheduler::new(Arc::new(probe_exec())).run(session).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(90) && elapsed < Duration::from_secs(91));
        assert_eq!(report.snapshot.phase("single_core").pass_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_aborts_before_any_work() {
        let exec = probe_exec().unreachable();
        let session = Session::new(
            "dut",
            Duration::from_secs(60),
            vec![Phase::new("a", 100.0, ScoringRule::PassFail)
                .share(100.0)
                .workload(ok("a"))],
            settings(),
        )
        .unwrap();

        let report = PhaseScheduler::new(Arc::new(exec.clone())).run(session).await;
        assert_eq!(report.state, SessionState::Aborted);
        assert_eq!(report.score_card.health, HealthStatus::Unavailable);
        assert_eq!(report.exit_code(), 2);
        assert_eq!(exec.invocation_count("probe"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_lost_mid_session_aborts() {
        let exec = probe_exec();
        let lost = exec.clone();
        let dropper: Arc<dyn Workload> = Arc::new(FnWorkload::new("dropper", move |_ctx| {
            lost.set_unreachable(true);
            Box::pin(async { Err(HarnessError::ConnectivityFailure("link down".into())) })
        }));
        let session = Session::new(
            "dut",
            Duration::from_secs(100),
            vec![
                Phase::new("a", 50.0, ScoringRule::PassFail)
                    .share(50.0)
                    .parallel()
                    .workload(dropper)
                    .workload(sleeper("long")),
                Phase::new("b", 50.0, ScoringRule::PassFail)
                    .share(50.0)
                    .workload(ok("never")),
            ],
            settings(),
        )
        .unwrap();

        let started = Instant::now();
        let report = PhaseScheduler::new(Arc::new(exec)).run(session).await;
        assert_eq!(report.state, SessionState::Aborted);
        // the sleeper was cancelled instead of running out its 50s
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.snapshot.phase("b").total_runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ecc_errors_charged_to_phase() {
        let exec = probe_exec().on_sequence(
            "edac",
            vec![
                ScriptedResponse::output("mc0 ce=0 ue=0\n"),
                ScriptedResponse::output("mc0 ce=2 ue=1\n"),
            ],
        );
        let mut settings = settings();
        settings.ecc = Some(crate::config::EccConfig {
            enabled: true,
            phase: "pattern".to_string(),
            command: "edac".to_string(),
        });
        let session = Session::new(
            "dut",
            Duration::from_secs(60),
            vec![Phase::new("pattern", 100.0, ScoringRule::PassFail)
                .share(100.0)
                .workload(ok("ram"))],
            settings,
        )
        .unwrap();

        let report = PhaseScheduler::new(Arc::new(exec)).run(session).await;
        assert_eq!(report.ecc.as_ref().map(|d| d.uncorrectable), Some(1));
        assert_eq!(report.score_card.sub_score("pattern"), Some(0.0));
        assert_eq!(report.score_card.verdict, Verdict::Failed);
        assert!(report.snapshot.warnings.iter().any(|w| w.scope == "ecc"));
    }
}
