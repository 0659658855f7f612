//! A fully resolved validation session.
//!
//! The phase list, allotments and settings are fixed when the session is
//! built; the scheduler only consumes it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::validator::{validate_thresholds, validate_weights};
use crate::config::{EccConfig, HarnessConfig, Thresholds, DEFAULT_PROBE_COMMAND};
use crate::error::{HarnessError, Result};
use crate::models::{ExecutionMode, ScoringRule};
use crate::orchestrator::budget::{allocate_budget, BudgetRequest};
use crate::orchestrator::state::SessionTracker;
use crate::scoring::PhaseScoring;
use crate::workload::{Workload, WorkloadRegistry};

/// One weighted segment of the session.
#[derive(Clone)]
pub struct Phase {
    pub name: String,
    pub weight: f64,
    pub share_percent: f64,
    pub duration: Option<Duration>,
    pub mode: ExecutionMode,
    pub rule: ScoringRule,
    pub workloads: Vec<Arc<dyn Workload>>,
    /// Resolved by `Session::new`
    pub allotment: Duration,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("mode", &self.mode)
            .field("rule", &self.rule)
            .field(
                "workloads",
                &self.workloads.iter().map(|w| w.name()).collect::<Vec<_>>(),
            )
            .field("allotment", &self.allotment)
            .finish()
    }
}

impl Phase {
    pub fn new(name: impl Into<String>, weight: f64, rule: ScoringRule) -> Self {
        Phase {
            name: name.into(),
            weight,
            share_percent: 0.0,
            duration: None,
            mode: ExecutionMode::Sequential,
            rule,
            workloads: Vec::new(),
            allotment: Duration::ZERO,
        }
    }

    pub fn share(mut self, percent: f64) -> Self {
        self.share_percent = percent;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.mode = ExecutionMode::Parallel;
        self
    }

    pub fn workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workloads.push(workload);
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.mode == ExecutionMode::Parallel
    }

    /// Baselines of the workloads that have one.
    pub fn baselines(&self) -> BTreeMap<String, f64> {
        self.workloads
            .iter()
            .filter_map(|w| w.baseline().map(|b| (w.name().to_string(), b)))
            .collect()
    }
}

/// Timing, thresholds and telemetry settings for one run.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub sample_interval: Duration,
    pub min_phase: Duration,
    pub filler_phase: Option<String>,
    pub workload_grace: Duration,
    pub cancel_grace: Duration,
    pub connect_timeout: Duration,
    pub thresholds: Thresholds,
    pub probe_command: String,
    pub ecc: Option<EccConfig>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            sample_interval: Duration::from_secs(5),
            min_phase: Duration::from_secs(30),
            filler_phase: None,
            workload_grace: Duration::from_secs(10),
            cancel_grace: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            thresholds: Thresholds::default(),
            probe_command: DEFAULT_PROBE_COMMAND.to_string(),
            ecc: None,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        SessionSettings {
            sample_interval: config.sample_interval(),
            min_phase: Duration::from_secs(config.min_phase_secs),
            filler_phase: config.filler_phase.clone(),
            workload_grace: Duration::from_secs(config.workload_grace_secs),
            cancel_grace: Duration::from_secs(config.cancel_grace_secs),
            connect_timeout: config.connect_timeout(),
            thresholds: config.thresholds.clone(),
            probe_command: config.probe_command.clone(),
            ecc: config.ecc.enabled.then(|| config.ecc.clone()),
        }
    }
}

impl SessionSettings {
    /// Checks that do not depend on the budget; a zero sample interval would
    /// leave the session without telemetry.
    fn validate(&self, phases: &[Phase]) -> Result<()> {
        if self.sample_interval.is_zero() {
            return Err(HarnessError::Configuration(
                "Sample interval must be greater than zero".to_string(),
            ));
        }
        if self.probe_command.trim().is_empty() {
            return Err(HarnessError::Configuration(
                "Telemetry probe command cannot be empty".to_string(),
            ));
        }
        validate_thresholds(&self.thresholds)?;
        if let Some(ecc) = &self.ecc {
            if !phases.iter().any(|p| p.name == ecc.phase) {
                return Err(HarnessError::Configuration(format!(
                    "ECC errors are charged to unknown phase '{}'",
                    ecc.phase
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Session {
    pub target: String,
    pub total_duration: Duration,
    pub phases: Vec<Phase>,
    pub settings: SessionSettings,
    pub(crate) tracker: SessionTracker,
}

impl Session {
    /// Validate the phase list and resolve every phase's allotment.
    pub fn new(
        target: impl Into<String>,
        total_duration: Duration,
        mut phases: Vec<Phase>,
        settings: SessionSettings,
    ) -> Result<Self> {
        if total_duration.is_zero() {
            return Err(HarnessError::Configuration(
                "Session budget must be greater than zero".to_string(),
            ));
        }
        if phases.is_empty() {
            return Err(HarnessError::Configuration(
                "A session needs at least one phase".to_string(),
            ));
        }
        for (i, phase) in phases.iter().enumerate() {
            if phases[..i].iter().any(|p| p.name == phase.name) {
                return Err(HarnessError::Configuration(format!(
                    "Duplicate phase name '{}'",
                    phase.name
                )));
            }
            if phase.workloads.is_empty() {
                return Err(HarnessError::Configuration(format!(
                    "Phase '{}' has no workloads",
                    phase.name
                )));
            }
        }
        validate_weights(phases.iter().map(|p| (p.name.as_str(), p.weight)))?;
        settings.validate(&phases)?;

        let requests: Vec<BudgetRequest> = phases
            .iter()
            .map(|p| BudgetRequest {
                name: p.name.clone(),
                share_percent: p.share_percent,
                duration: p.duration,
            })
            .collect();
        let allotments = allocate_budget(
            total_duration,
            &requests,
            settings.min_phase,
            settings.filler_phase.as_deref(),
        )?;
        for (phase, allotment) in phases.iter_mut().zip(allotments) {
            phase.allotment = allotment;
        }

        Ok(Session {
            target: target.into(),
            total_duration,
            phases,
            settings,
            tracker: SessionTracker::new(),
        })
    }

    /// Phase table from the config (overrides applied), workloads from the registry.
    pub fn from_config(config: &HarnessConfig, registry: &WorkloadRegistry) -> Result<Self> {
        let phases = config
            .effective_phases()
            .into_iter()
            .map(|pc| Phase {
                workloads: registry.workloads(&pc.name),
                allotment: Duration::ZERO,
                duration: pc.duration_secs.map(Duration::from_secs),
                name: pc.name,
                weight: pc.weight,
                share_percent: pc.share_percent,
                mode: pc.mode,
                rule: pc.scoring,
            })
            .collect();
        Session::new(
            config.target.address.clone(),
            config.total_duration(),
            phases,
            SessionSettings::from_config(config),
        )
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn scoring_table(&self) -> Vec<PhaseScoring> {
        self.phases
            .iter()
            .map(|p| PhaseScoring {
                name: p.name.clone(),
                weight: p.weight,
                rule: p.rule,
                baselines: p.baselines(),
            })
            .collect()
    }

    /// Sum of all allotments.
    pub fn allotted(&self) -> Duration {
        self.phases.iter().map(|p| p.allotment).sum()
    }
}
