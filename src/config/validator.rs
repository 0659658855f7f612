//! Config validation.
//!
//! Every check here runs before any workload starts; a failure surfaces as a
//! `ConfigurationError` and the session never reaches `Running`.

use super::{HarnessConfig, ParserConfig, PhaseConfig, Thresholds, WorkloadConfig};
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;

/// Weights may be fractional; compare with this tolerance.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Validate the complete config, with weight overrides applied.
pub fn validate_config(config: &HarnessConfig) -> Result<(), ConfigError> {
    if config.total_duration_secs == 0 {
        return Err(ConfigError::ValidationFailed(
            "Total duration must be greater than zero".to_string(),
        ));
    }
    if config.sample_interval_secs == 0 {
        return Err(ConfigError::ValidationFailed(
            "Sample interval must be greater than zero".to_string(),
        ));
    }
    if config.probe_command.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Telemetry probe command cannot be empty".to_string(),
        ));
    }

    validate_thresholds(&config.thresholds)?;

    for name in config.weight_overrides.keys() {
        if !config.phases.iter().any(|p| &p.name == name) {
            return Err(ConfigError::ValidationFailed(format!(
                "Weight override for unknown phase '{}'",
                name
            )));
        }
    }

    let phases = config.effective_phases();
    validate_phases(&phases)?;

    if let Some(filler) = &config.filler_phase {
        if !phases.iter().any(|p| &p.name == filler) {
            return Err(ConfigError::ValidationFailed(format!(
                "Filler phase '{}' is not in the phase table",
                filler
            )));
        }
    }

    if config.ecc.enabled && !phases.iter().any(|p| p.name == config.ecc.phase) {
        return Err(ConfigError::ValidationFailed(format!(
            "ECC errors are charged to unknown phase '{}'",
            config.ecc.phase
        )));
    }

    Ok(())
}

/// Weights in [0, 100] summing to 100 within `WEIGHT_TOLERANCE`.
pub fn validate_weights<'a>(
    weights: impl IntoIterator<Item = (&'a str, f64)>,
) -> Result<(), ConfigError> {
    let mut total = 0.0;
    for (name, weight) in weights {
        if !weight.is_finite() || !(0.0..=100.0).contains(&weight) {
            return Err(ConfigError::ValidationFailed(format!(
                "Phase '{}' has weight {} outside 0-100",
                name, weight
            )));
        }
        total += weight;
    }
    if (total - 100.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigError::ValidationFailed(format!(
            "Phase weights must sum to 100, got {}",
            total
        )));
    }
    Ok(())
}

/// Phase table checks: non-empty, unique names, weights, shares, workloads.
pub fn validate_phases(phases: &[PhaseConfig]) -> Result<(), ConfigError> {
    if phases.is_empty() {
        return Err(ConfigError::ValidationFailed(
            "At least one phase is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for phase in phases {
        if phase.name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Phase name cannot be empty".to_string(),
            ));
        }
        if !seen.insert(phase.name.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Duplicate phase name '{}'",
                phase.name
            )));
        }
        if !phase.share_percent.is_finite() || phase.share_percent < 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "Phase '{}' has invalid share {}",
                phase.name, phase.share_percent
            )));
        }
        if phase.duration_secs.is_none() && phase.share_percent == 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "Phase '{}' needs either a share or an explicit duration",
                phase.name
            )));
        }
        if phase.workloads.is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "Phase '{}' has no workloads",
                phase.name
            )));
        }
        for workload in &phase.workloads {
            validate_workload(&phase.name, workload)?;
        }
    }

    let shares: f64 = phases.iter().map(|p| p.share_percent).sum();
    if shares > 100.0 + WEIGHT_TOLERANCE {
        return Err(ConfigError::ValidationFailed(format!(
            "Phase shares add up to {}% of the budget",
            shares
        )));
    }

    validate_weights(phases.iter().map(|p| (p.name.as_str(), p.weight)))
}

pub fn validate_workload(phase: &str, workload: &WorkloadConfig) -> Result<(), ConfigError> {
    if workload.name.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(format!(
            "Phase '{}' has a workload without a name",
            phase
        )));
    }
    if workload.command.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(format!(
            "Workload '{}' has an empty command",
            workload.name
        )));
    }
    if workload.instances == 0 {
        return Err(ConfigError::ValidationFailed(format!(
            "Workload '{}' must run at least one instance",
            workload.name
        )));
    }
    if let Some(baseline) = workload.baseline {
        if !baseline.is_finite() || baseline < 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "Workload '{}' has invalid baseline {}",
                workload.name, baseline
            )));
        }
    }

    match &workload.parser {
        ParserConfig::ExitStatus => {}
        ParserConfig::Pattern { pattern, .. } => {
            let re = Regex::new(pattern).map_err(|e| {
                ConfigError::ValidationFailed(format!(
                    "Workload '{}' has an invalid pattern: {}",
                    workload.name, e
                ))
            })?;
            if re.captures_len() < 2 {
                return Err(ConfigError::ValidationFailed(format!(
                    "Workload '{}' pattern needs a capture group for the value",
                    workload.name
                )));
            }
        }
        ParserConfig::KeyValue { result_key, .. } => {
            if result_key.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Workload '{}' has an empty result key",
                    workload.name
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_thresholds(t: &Thresholds) -> Result<(), ConfigError> {
    let all = [
        t.noise_floor_mhz,
        t.drop_percent,
        t.heat_c,
        t.warning_temp_c,
        t.critical_temp_c,
        t.pass_score,
    ];
    if all.iter().any(|v| !v.is_finite()) {
        return Err(ConfigError::ValidationFailed(
            "Thresholds must be finite numbers".to_string(),
        ));
    }
    if t.noise_floor_mhz < 0.0 {
        return Err(ConfigError::ValidationFailed(
            "Noise floor cannot be negative".to_string(),
        ));
    }
    if !(t.drop_percent > 0.0 && t.drop_percent < 100.0) {
        return Err(ConfigError::ValidationFailed(format!(
            "Throttle drop threshold must be between 0 and 100 percent, got {}",
            t.drop_percent
        )));
    }
    if t.warning_temp_c > t.critical_temp_c {
        return Err(ConfigError::ValidationFailed(format!(
            "Warning temperature {} exceeds critical temperature {}",
            t.warning_temp_c, t.critical_temp_c
        )));
    }
    if !(0.0..=100.0).contains(&t.pass_score) {
        return Err(ConfigError::ValidationFailed(format!(
            "Pass score must be within 0-100, got {}",
            t.pass_score
        )));
    }
    Ok(())
}
