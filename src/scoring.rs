//! Health scoring: weighted sub-scores, warning penalties and the verdict.
//!
//! ## Algorithm
//! 1. Each phase gets a sub-score in [0, 100] from its scoring rule:
//!    - **ratio**: mean metric/baseline ratio (failed runs count as 0),
//!      tiered ≥1.0 → 100, ≥0.8 → 80, ≥0.6 → 60, else 30
//!    - **pass/fail**: 100 if nothing failed and something passed, else 0
//!    - **thermal**: throttle events 0 → 100, ≤2 → 80, ≤5 → 60, else 30,
//!      capped at 60 after a critical temperature or a failed thermal workload
//! 2. Weighted total = Σ(sub-score × weight) / 100
//! 3. Every sub-score below 80 is a warning, as is every recorded warning;
//!    ≥5 warnings cost 20 points, ≥3 cost 10 (floored at 0)
//! 4. PASSED at or above the pass threshold, FAILED otherwise
//!
//! Scoring is a pure function of its inputs; the same snapshot always yields
//! the same `ScoreCard`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::aggregator::AggregatorSnapshot;
use crate::config::Thresholds;
use crate::models::{PhaseResult, ScoringRule};
use crate::telemetry::TelemetrySummary;

/// Sub-scores below this count as a warning and mark the phase responsible.
pub const GOOD_TIER: f64 = 80.0;

/// Thermal sub-score ceiling after a critical temperature or thermal failure.
pub const THERMAL_CAP: f64 = 60.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unavailable,
}

impl HealthStatus {
    /// Reporting label only; the verdict comes from the pass threshold.
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            HealthStatus::Excellent
        } else if score >= 85.0 {
            HealthStatus::Good
        } else if score >= 70.0 {
            HealthStatus::Acceptable
        } else {
            HealthStatus::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "EXCELLENT",
            HealthStatus::Good => "GOOD",
            HealthStatus::Acceptable => "ACCEPTABLE",
            HealthStatus::Poor => "POOR",
            HealthStatus::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Passed,
    Failed,
    Aborted,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
            Verdict::Aborted => "ABORTED",
        }
    }

    /// 0 = PASSED, 1 = FAILED, 2 = ABORTED/UNAVAILABLE
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Passed => 0,
            Verdict::Failed => 1,
            Verdict::Aborted => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the scorer needs to know about one phase.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseScoring {
    pub name: String,
    pub weight: f64,
    pub rule: ScoringRule,
    /// Workload name to expected metric value
    pub baselines: BTreeMap<String, f64>,
}

impl PhaseScoring {
    pub fn new(name: impl Into<String>, weight: f64, rule: ScoringRule) -> Self {
        PhaseScoring {
            name: name.into(),
            weight,
            rule,
            baselines: BTreeMap::new(),
        }
    }

    pub fn with_baseline(mut self, workload: impl Into<String>, baseline: f64) -> Self {
        self.baselines.insert(workload.into(), baseline);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseScore {
    pub phase: String,
    pub weight: f64,
    pub rule: ScoringRule,
    pub score: f64,
    pub pass_count: u64,
    pub fail_count: u64,
    /// Mean achieved ratio for ratio-scored phases
    pub mean_ratio: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub sub_scores: Vec<PhaseScore>,
    pub warnings: usize,
    pub warning_details: Vec<String>,
    pub weighted_total: f64,
    pub penalty: f64,
    pub final_score: f64,
    pub health: HealthStatus,
    pub verdict: Verdict,
    /// Phases with a sub-score below the good tier
    pub responsible_phases: Vec<String>,
    pub throttle_events: usize,
    /// Set only for aborted sessions
    pub abort_reason: Option<String>,
}

impl ScoreCard {
    /// Card for a session that never reached scoring.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ScoreCard {
            sub_scores: Vec::new(),
            warnings: 0,
            warning_details: Vec::new(),
            weighted_total: 0.0,
            penalty: 0.0,
            final_score: 0.0,
            health: HealthStatus::Unavailable,
            verdict: Verdict::Aborted,
            responsible_phases: Vec::new(),
            throttle_events: 0,
            abort_reason: Some(reason.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    pub fn sub_score(&self, phase: &str) -> Option<f64> {
        self.sub_scores
            .iter()
            .find(|s| s.phase == phase)
            .map(|s| s.score)
    }
}

pub fn ratio_tier(ratio: f64) -> f64 {
    if ratio >= 1.0 {
        100.0
    } else if ratio >= 0.8 {
        80.0
    } else if ratio >= 0.6 {
        60.0
    } else {
        30.0
    }
}

pub fn thermal_tier(events: usize) -> f64 {
    match events {
        0 => 100.0,
        1..=2 => 80.0,
        3..=5 => 60.0,
        _ => 30.0,
    }
}

pub fn warning_penalty(warnings: usize) -> f64 {
    if warnings >= 5 {
        20.0
    } else if warnings >= 3 {
        10.0
    } else {
        0.0
    }
}

#[derive(Clone, Debug)]
pub struct HealthScorer {
    phases: Vec<PhaseScoring>,
    thresholds: Thresholds,
}

impl HealthScorer {
    pub fn new(phases: Vec<PhaseScoring>, thresholds: Thresholds) -> Self {
        HealthScorer { phases, thresholds }
    }

    fn ratio_score(&self, phase: &PhaseScoring, result: &PhaseResult) -> (f64, Option<f64>) {
        if result.pass_count == 0 {
            return (0.0, None);
        }
        let ratios: Vec<f64> = result
            .metrics
            .iter()
            .filter(|m| m.metric.is_success())
            .map(|m| {
                let baseline = phase.baselines.get(&m.workload).copied().unwrap_or(0.0);
                m.metric.ratio_to(baseline)
            })
            .collect();
        let runs = ratios.len() as u64 + result.fail_count;
        if runs == 0 {
            return (0.0, None);
        }
        let mean = ratios.iter().sum::<f64>() / runs as f64;
        (ratio_tier(mean), Some(mean))
    }

    fn phase_score(
        &self,
        phase: &PhaseScoring,
        result: &PhaseResult,
        snapshot: &AggregatorSnapshot,
        telemetry: &TelemetrySummary,
    ) -> PhaseScore {
        let (score, mean_ratio) = match phase.rule {
            ScoringRule::Ratio => self.ratio_score(phase, result),
            ScoringRule::PassFail => {
                let ok = result.fail_count == 0 && result.pass_count > 0;
                (if ok { 100.0 } else { 0.0 }, None)
            }
            ScoringRule::Thermal => {
                let mut score = thermal_tier(snapshot.throttle_events.len());
                if telemetry.reached_critical() || result.fail_count > 0 {
                    score = score.min(THERMAL_CAP);
                }
                (score, None)
            }
        };
        PhaseScore {
            phase: phase.name.clone(),
            weight: phase.weight,
            rule: phase.rule,
            score,
            pass_count: result.pass_count,
            fail_count: result.fail_count,
            mean_ratio,
        }
    }

    pub fn score(&self, snapshot: &AggregatorSnapshot, telemetry: &TelemetrySummary) -> ScoreCard {
        let sub_scores: Vec<PhaseScore> = self
            .phases
            .iter()
            .map(|phase| {
                let result = snapshot.phase(&phase.name);
                self.phase_score(phase, &result, snapshot, telemetry)
            })
            .collect();

        let weighted_total = sub_scores.iter().map(|s| s.score * s.weight).sum::<f64>() / 100.0;

        let mut warning_details: Vec<String> = Vec::new();
        let mut responsible_phases = Vec::new();
        for s in &sub_scores {
            if s.score < GOOD_TIER {
                warning_details.push(format!("{} scored {:.0}", s.phase, s.score));
                responsible_phases.push(s.phase.clone());
            }
        }
        warning_details.extend(
            snapshot
                .warnings
                .iter()
                .map(|w| format!("{}: {}", w.scope, w.message)),
        );

        let warnings = warning_details.len();
        let penalty = warning_penalty(warnings);
        let final_score = (weighted_total - penalty).max(0.0);
        let verdict = if final_score >= self.thresholds.pass_score {
            Verdict::Passed
        } else {
            Verdict::Failed
        };

        log::info!(
            "[Scorer] weighted {:.1}, {} warnings (-{:.0}), final {:.1} -> {}",
            weighted_total,
            warnings,
            penalty,
            final_score,
            verdict
        );

        ScoreCard {
            sub_scores,
            warnings,
            warning_details,
            weighted_total,
            penalty,
            final_score,
            health: HealthStatus::from_score(final_score),
            verdict,
            responsible_phases,
            throttle_events: snapshot.throttle_events.len(),
            abort_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, FailureRecord, Metric, MetricRecord, WarningRecord};

    fn passing(runs: u64) -> PhaseResult {
        PhaseResult {
            pass_count: runs,
            ..PhaseResult::default()
        }
    }

    #[test]
    fn test_tiers() {
        assert_eq!(ratio_tier(1.2), 100.0);
        assert_eq!(ratio_tier(0.8), 80.0);
        assert_eq!(ratio_tier(0.79), 60.0);
        assert_eq!(ratio_tier(0.1), 30.0);
        assert_eq!(thermal_tier(0), 100.0);
        assert_eq!(thermal_tier(2), 80.0);
        assert_eq!(thermal_tier(5), 60.0);
        assert_eq!(thermal_tier(6), 30.0);
        assert_eq!(warning_penalty(2), 0.0);
        assert_eq!(warning_penalty(3), 10.0);
        assert_eq!(warning_penalty(5), 20.0);
    }

    #[test]
    fn test_health_labels() {
        assert_eq!(HealthStatus::from_score(100.0), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(85.0), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(70.0), HealthStatus::Acceptable);
        assert_eq!(HealthStatus::from_score(69.9), HealthStatus::Poor);
    }

    #[test]
    fn test_ratio_counts_failures_as_zero() {
        let scorer = HealthScorer::new(
            vec![PhaseScoring::new("gemm", 100.0, ScoringRule::Ratio).with_baseline("gemm", 100.0)],
            Thresholds::default(),
        );
        let mut snapshot = AggregatorSnapshot::default();
        snapshot.phases.insert(
            "gemm".to_string(),
            PhaseResult {
                pass_count: 3,
                fail_count: 1,
                metrics: (0..3)
                    .map(|_| MetricRecord {
                        workload: "gemm".to_string(),
                        metric: Metric::rate(100.0, "GFLOPS"),
                    })
                    .collect(),
                failures: vec![FailureRecord {
                    workload: "gemm".to_string(),
                    kind: FailureKind::Timeout,
                    message: "slow".to_string(),
                }],
            },
        );
        let card = scorer.score(&snapshot, &TelemetrySummary::default());
        // 3 x 1.0 + 1 x 0.0 over 4 runs
        assert_eq!(card.sub_scores[0].mean_ratio, Some(0.75));
        assert_eq!(card.sub_score("gemm"), Some(60.0));
    }

    #[test]
    fn test_ratio_phase_without_passes_scores_zero() {
        let scorer = HealthScorer::new(
            vec![PhaseScoring::new("single_core", 100.0, ScoringRule::Ratio)],
            Thresholds::default(),
        );
        let card = scorer.score(&AggregatorSnapshot::default(), &TelemetrySummary::default());
        assert_eq!(card.sub_score("single_core"), Some(0.0));
        assert_eq!(card.verdict, Verdict::Failed);
        assert_eq!(card.responsible_phases, vec!["single_core"]);
    }

    #[test]
    fn test_pass_fail_rule() {
        let scorer = HealthScorer::new(
            vec![
                PhaseScoring::new("clean", 50.0, ScoringRule::PassFail),
                PhaseScoring::new("dirty", 50.0, ScoringRule::PassFail),
            ],
            Thresholds::default(),
        );
        let mut snapshot = AggregatorSnapshot::default();
        snapshot.phases.insert("clean".to_string(), passing(2));
        snapshot.phases.insert(
            "dirty".to_string(),
            PhaseResult {
                pass_count: 5,
                fail_count: 1,
                ..PhaseResult::default()
            },
        );
        let card = scorer.score(&snapshot, &TelemetrySummary::default());
        assert_eq!(card.sub_score("clean"), Some(100.0));
        assert_eq!(card.sub_score("dirty"), Some(0.0));
        assert_eq!(card.weighted_total, 50.0);
    }

    #[test]
    fn test_thermal_cap_on_critical_temperature() {
        let scorer = HealthScorer::new(
            vec![PhaseScoring::new("thermal", 100.0, ScoringRule::Thermal)],
            Thresholds::default(),
        );
        let mut snapshot = AggregatorSnapshot::default();
        snapshot.phases.insert("thermal".to_string(), passing(1));
        let telemetry = TelemetrySummary {
            critical_samples: 2,
            ..TelemetrySummary::default()
        };
        let card = scorer.score(&snapshot, &telemetry);
        assert_eq!(card.sub_score("thermal"), Some(THERMAL_CAP));
    }

    #[test]
    fn test_recorded_warnings_add_to_sub_score_warnings() {
        let scorer = HealthScorer::new(
            vec![
                PhaseScoring::new("a", 50.0, ScoringRule::PassFail),
                PhaseScoring::new("b", 50.0, ScoringRule::PassFail),
            ],
            Thresholds::default(),
        );
        let mut snapshot = AggregatorSnapshot::default();
        snapshot.phases.insert("a".to_string(), passing(1));
        snapshot.warnings = vec![
            WarningRecord {
                scope: "ecc".to_string(),
                message: "2 correctable ECC errors".to_string(),
            },
            WarningRecord {
                scope: "telemetry".to_string(),
                message: "hot".to_string(),
            },
        ];
        let card = scorer.score(&snapshot, &TelemetrySummary::default());
        // "b" scored 0 plus two recorded warnings
        assert_eq!(card.warnings, 3);
        assert_eq!(card.penalty, 10.0);
        assert_eq!(card.final_score, 40.0);
    }

    #[test]
    fn test_penalty_floors_at_zero() {
        let scorer = HealthScorer::new(
            vec![PhaseScoring::new("a", 100.0, ScoringRule::PassFail)],
            Thresholds::default(),
        );
        let mut snapshot = AggregatorSnapshot::default();
        snapshot.warnings = (0..6)
            .map(|i| WarningRecord {
                scope: "x".to_string(),
                message: i.to_string(),
            })
            .collect();
        let card = scorer.score(&snapshot, &TelemetrySummary::default());
        assert_eq!(card.final_score, 0.0);
        assert_eq!(card.health, HealthStatus::Poor);
    }

    #[test]
    fn test_unavailable_card() {
        let card = ScoreCard::unavailable("ssh: connection refused");
        assert_eq!(card.health, HealthStatus::Unavailable);
        assert_eq!(card.verdict.exit_code(), 2);
        assert!(!card.passed());
    }
}
