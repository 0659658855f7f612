//! ECC error counter monitoring through the target's EDAC interface.
//!
//! Counters are read once before the first phase and once after the last.
//! New uncorrectable errors fail the configured phase; new correctable errors
//! only warn, since ECC did its job but the memory has weak cells.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::aggregator::ResultAggregator;
use crate::models::{FailureKind, FailureRecord};
use crate::target::{never_cancel, RemoteExecutor};

static CONTROLLER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\S+)\s+ce=(\d+)\s+ue=(\d+)\s*$").expect("Invalid EDAC counter regex")
});

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerCounts {
    pub controller: String,
    pub correctable: u64,
    pub uncorrectable: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EccCounts {
    pub controllers: Vec<ControllerCounts>,
}

impl EccCounts {
    pub fn parse(output: &str) -> Self {
        let controllers = output
            .lines()
            .filter_map(|line| CONTROLLER_RE.captures(line))
            .filter_map(|caps| {
                Some(ControllerCounts {
                    controller: caps[1].to_string(),
                    correctable: caps[2].parse().ok()?,
                    uncorrectable: caps[3].parse().ok()?,
                })
            })
            .collect();
        EccCounts { controllers }
    }

    pub fn is_supported(&self) -> bool {
        !self.controllers.is_empty()
    }

    pub fn correctable(&self) -> u64 {
        self.controllers.iter().map(|c| c.correctable).sum()
    }

    pub fn uncorrectable(&self) -> u64 {
        self.controllers.iter().map(|c| c.uncorrectable).sum()
    }
}

/// Errors that appeared during the session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EccDelta {
    pub correctable: u64,
    pub uncorrectable: u64,
    pub controllers: Vec<ControllerCounts>,
}

impl EccDelta {
    pub fn between(start: &EccCounts, end: &EccCounts) -> Self {
        EccDelta {
            // counters can reset with the driver; never report negative growth
            correctable: end.correctable().saturating_sub(start.correctable()),
            uncorrectable: end.uncorrectable().saturating_sub(start.uncorrectable()),
            controllers: end.controllers.clone(),
        }
    }
}

pub struct EccMonitor {
    command: String,
    phase: String,
    timeout: Duration,
    baseline: Option<EccCounts>,
}

impl EccMonitor {
    pub fn new(command: impl Into<String>, phase: impl Into<String>, timeout: Duration) -> Self {
        EccMonitor {
            command: command.into(),
            phase: phase.into(),
            timeout,
            baseline: None,
        }
    }

    async fn read(&self, executor: &dyn RemoteExecutor) -> Option<EccCounts> {
        match executor.execute(&self.command, self.timeout, never_cancel()).await {
            Ok(output) if output.success() => Some(EccCounts::parse(&output.stdout)),
            Ok(output) => {
                log::debug!("[Ecc] Counter read exited with {}", output.exit_code);
                None
            }
            Err(e) => {
                log::debug!("[Ecc] Counter read failed: {}", e);
                None
            }
        }
    }

    /// Record the starting counters. Returns whether ECC is supported.
    pub async fn start(&mut self, executor: &dyn RemoteExecutor) -> bool {
        self.baseline = self.read(executor).await.filter(EccCounts::is_supported);
        match &self.baseline {
            Some(counts) => {
                log::info!(
                    "[Ecc] Monitoring {} memory controllers (CE {}, UE {})",
                    counts.controllers.len(),
                    counts.correctable(),
                    counts.uncorrectable()
                );
                true
            }
            None => {
                log::info!("[Ecc] ECC monitoring not available on this target");
                false
            }
        }
    }

    /// Read the final counters and charge new errors to the aggregator.
    pub async fn finish(
        &self,
        executor: &dyn RemoteExecutor,
        aggregator: &ResultAggregator,
    ) -> Option<EccDelta> {
        let baseline = self.baseline.as_ref()?;
        let Some(end) = self.read(executor).await else {
            aggregator.record_warning("ecc", "final ECC counter read failed");
            return None;
        };
        let delta = EccDelta::between(baseline, &end);

        if delta.uncorrectable > 0 {
            log::error!("[Ecc] {} uncorrectable ECC errors", delta.uncorrectable);
            aggregator.record_fail(
                &self.phase,
                FailureRecord {
                    workload: "ecc".to_string(),
                    kind: FailureKind::Failure,
                    message: format!("{} uncorrectable ECC errors", delta.uncorrectable),
                },
            );
        }
        if delta.correctable > 0 {
            aggregator.record_warning(
                "ecc",
                format!("{} correctable ECC errors (weak cells)", delta.correctable),
            );
        }
        Some(delta)
    }
}
