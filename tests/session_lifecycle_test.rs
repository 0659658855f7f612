//! End-to-end session runs against a scripted target
//!
//! Tests that:
//! 1. A hung workload is cancelled, recorded as a timeout, and the session still scores
//! 2. An unreachable target aborts with an UNAVAILABLE card and exit code 2
//! 3. Throttling seen by the sampler reaches the thermal sub-score
//! 4. Command workloads built from the default config run through the scheduler
//! 5. Settings that would silence telemetry are rejected before the session starts

use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use goatd_validator::config::MetricKind;
use goatd_validator::{
    CommandWorkload, FailureKind, FnWorkload, HarnessConfig, HarnessError, HealthStatus, Metric, Phase,
    PhaseScheduler, ScoringRule, ScriptedExecutor, ScriptedResponse, Session, SessionSettings,
    SessionState, Verdict, Workload, WorkloadRegistry,
};
use goatd_validator::workload::MetricParser;

fn settings() -> SessionSettings {
    SessionSettings {
        sample_interval: Duration::from_secs(1),
        min_phase: Duration::ZERO,
        workload_grace: Duration::from_secs(2),
        cancel_grace: Duration::from_secs(1),
        probe_command: "probe".to_string(),
        ..SessionSettings::default()
    }
}

fn quiet_target() -> ScriptedExecutor {
    ScriptedExecutor::new().on("probe", ScriptedResponse::output("freq_mhz=2400\ntemp_c=50\n"))
}

fn passing(name: &str) -> Arc<dyn Workload> {
    Arc::new(FnWorkload::new(name, |ctx| {
        Box::pin(async move {
            tokio::time::sleep(ctx.duration).await;
            Ok(Metric::success(true))
        })
    }))
}

#[tokio::test(start_paused = true)]
async fn scenario_d_hung_workload_times_out_and_session_scores() {
    let exec = quiet_target().on("stress-ng --hang", ScriptedResponse::Hang);
    let stuck: Arc<dyn Workload> = Arc::new(CommandWorkload::new(
        "stuck",
        "stress-ng --hang --timeout {duration}",
        MetricParser::ExitStatus,
    ));
    let session = Session::new(
        "dut-07",
        Duration::from_secs(60),
        vec![
            Phase::new("storage", 50.0, ScoringRule::PassFail)
                .share(50.0)
                .workload(stuck),
            Phase::new("cpu", 50.0, ScoringRule::PassFail)
                .share(50.0)
                .workload(passing("prime")),
        ],
        settings(),
    )
    .unwrap();

    let report = PhaseScheduler::new(Arc::new(exec)).run(session).await;

    assert_eq!(report.state, SessionState::Scored);
    let storage = report.snapshot.phase("storage");
    assert_eq!(storage.fail_count, 1);
    assert_eq!(storage.failures[0].kind, FailureKind::Timeout);
    assert!(storage.failures[0].message.contains("exceeded its allotment"));
    // the next phase still ran
    assert_eq!(report.snapshot.phase("cpu").pass_count, 1);

    assert_eq!(report.score_card.sub_score("storage"), Some(0.0));
    assert_eq!(report.score_card.verdict, Verdict::Failed);
    assert_eq!(report.score_card.responsible_phases, vec!["storage".to_string()]);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_target_aborts_session() {
    let exec = quiet_target().unreachable();
    let session = Session::new(
        "dut-07",
        Duration::from_secs(60),
        vec![Phase::new("cpu", 100.0, ScoringRule::PassFail)
            .share(100.0)
            .workload(passing("prime"))],
        settings(),
    )
    .unwrap();

    let report = PhaseScheduler::new(Arc::new(exec)).run(session).await;
    assert_eq!(report.state, SessionState::Aborted);
    assert_eq!(report.score_card.health, HealthStatus::Unavailable);
    assert_eq!(report.score_card.verdict, Verdict::Aborted);
    assert!(report.score_card.abort_reason.is_some());
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.snapshot.total_passes(), 0);
}

#[tokio::test(start_paused = true)]
async fn throttling_lowers_thermal_score() {
    let exec = ScriptedExecutor::new().on_sequence(
        "probe",
        vec![
            // cold start reading is ignored
            ScriptedResponse::output("freq_mhz=0\ntemp_c=40\n"),
            ScriptedResponse::output("freq_mhz=2000\ntemp_c=70\n"),
            ScriptedResponse::output("freq_mhz=1500\ntemp_c=78\n"),
        ],
    );
    let session = Session::new(
        "dut-07",
        Duration::from_secs(10),
        vec![Phase::new("thermal", 100.0, ScoringRule::Thermal)
            .share(100.0)
            .workload(passing("sustained_load"))],
        settings(),
    )
    .unwrap();

    let report = PhaseScheduler::new(Arc::new(exec)).run(session).await;
    assert_eq!(report.state, SessionState::Scored);
    assert_eq!(report.snapshot.throttle_events.len(), 1);
    assert_eq!(report.score_card.throttle_events, 1);
    assert_eq!(report.score_card.sub_score("thermal"), Some(80.0));
    assert!(report.telemetry.sample_count >= 10);
    assert_eq!(report.telemetry.frequency_mhz.map(|s| s.max), Some(2000.0));
}

#[tokio::test(start_paused = true)]
async fn ratio_phase_uses_parsed_command_metrics() {
    let exec = quiet_target().on("gemm", ScriptedResponse::output("gemm: 400.0 GFLOPS\n"));
    let gemm: Arc<dyn Workload> = Arc::new(
        CommandWorkload::new(
            "gemm",
            "gemm --seconds {duration}",
            MetricParser::Pattern {
                regex: Regex::new(r"([0-9.]+) GFLOPS").unwrap(),
                kind: MetricKind::Rate,
                unit: "GFLOPS".to_string(),
            },
        )
        .with_baseline(500.0),
    );
    let session = Session::new(
        "dut-07",
        Duration::from_secs(30),
        vec![Phase::new("multi_core", 100.0, ScoringRule::Ratio)
            .share(100.0)
            .parallel()
            .workload(gemm)],
        settings(),
    )
    .unwrap();

    let report = PhaseScheduler::new(Arc::new(exec.clone())).run(session).await;
    // 400 / 500 = 0.8
    assert_eq!(report.score_card.sub_score("multi_core"), Some(80.0));
    assert_eq!(exec.invocation_count("gemm --seconds 30"), 1);
}

#[tokio::test(start_paused = true)]
async fn default_config_session_runs_to_a_verdict() {
    let mut config = HarnessConfig::default();
    config.probe_command = "probe".to_string();
    config.ecc.command = "edac".to_string();

    // every busy loop reports ops, memory copy reports GB/s, RAM suite passes
    let exec = quiet_target()
        .on("ops=", ScriptedResponse::output("ops=123456\n"))
        .on("dd if=/dev/zero", ScriptedResponse::output("4294967296 bytes copied, 1.2 s, 3.6 GB/s\n"))
        .on(
            "comprehensive_ram_test",
            ScriptedResponse::output("RESULT=PASSED\nTOTAL_ERRORS=0\nTOTAL_OPERATIONS=9000\n"),
        )
        .on("edac", ScriptedResponse::output("mc0 ce=0 ue=0\n"));

    let registry = WorkloadRegistry::from_config(&config).unwrap();
    let session = Session::from_config(&config, &registry).unwrap();
    let report = PhaseScheduler::new(Arc::new(exec)).run(session).await;

    assert_eq!(report.state, SessionState::Scored);
    assert_eq!(report.snapshot.total_failures(), 0);
    // no baselines configured, so every successful run counts as achieved
    assert_eq!(report.score_card.final_score, 100.0);
    assert_eq!(report.score_card.verdict, Verdict::Passed);
    assert_eq!(report.ecc.map(|d| d.uncorrectable), Some(0));
}

#[test]
fn zero_sample_interval_is_rejected_before_running() {
    let result = Session::new(
        "dut-07",
        Duration::from_secs(60),
        vec![Phase::new("thermal", 100.0, ScoringRule::Thermal)
            .share(100.0)
            .workload(passing("sustained_load"))],
        SessionSettings {
            sample_interval: Duration::ZERO,
            ..settings()
        },
    );
    match result {
        Err(HarnessError::Configuration(msg)) => assert!(msg.contains("Sample interval")),
        other => panic!("expected a configuration error, got {:?}", other.map(|s| s.target)),
    }
}
