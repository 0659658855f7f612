//! Configuration for validation sessions.
//!
//! `HarnessConfig` is the plain struct the (external) CLI layer hands to the
//! core. Everything that used to be a magic number in a per-component script
//! lives here: thresholds, the phase/weight table, the telemetry probe, ECC
//! monitoring and timing budgets.
//!
//! # Module Structure
//!
//! - `loader`: reads and writes `.json` / `.toml` config files
//! - `validator`: rejects inconsistent configs before any execution starts
//!
//! Durations are stored in whole seconds so config files stay readable.

pub mod loader;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{ExecutionMode, ScoringRule};

/// Reads every thermal zone, every core's current clock and the aggregate
/// `/proc/stat` line in the format `telemetry::probe` understands.
pub const DEFAULT_PROBE_COMMAND: &str = "for z in /sys/class/thermal/thermal_zone*/temp; do [ -r \"$z\" ] && echo \"temp_milli=$(cat \"$z\")\"; done; \
for f in /sys/devices/system/cpu/cpu[0-9]*/cpufreq/scaling_cur_freq; do [ -r \"$f\" ] && echo \"freq_khz=$(cat \"$f\")\"; done; \
head -n1 /proc/stat";

/// One line per EDAC memory controller: `mc0 ce=<n> ue=<n>`.
pub const DEFAULT_ECC_COMMAND: &str = "for mc in /sys/devices/system/edac/mc/mc*; do [ -d \"$mc\" ] && \
echo \"$(basename \"$mc\") ce=$(cat \"$mc/ce_count\" 2>/dev/null || echo 0) ue=$(cat \"$mc/ue_count\" 2>/dev/null || echo 0)\"; done; true";

/// Busy loop that reports how many iterations it completed within `{duration}` seconds.
const BUSY_LOOP_COMMAND: &str = "end=$(($(date +%s)+{duration})); n=0; \
while [ \"$(date +%s)\" -lt \"$end\" ]; do n=$((n+1)); done; echo \"ops=$n\"";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Human-readable identity of the device under test
    pub address: String,
    /// Program and arguments prepended to every command, e.g. `["ssh", "root@dut"]`.
    /// Empty means commands run locally through `sh -c`.
    pub command_prefix: Vec<String>,
    pub connect_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            address: "localhost".to_string(),
            command_prefix: Vec::new(),
            connect_timeout_secs: 10,
        }
    }
}

/// Thresholds used by the throttle detector, thermal scoring and the verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Frequencies at or below this are treated as noise, not a baseline
    pub noise_floor_mhz: f64,
    /// Minimum drop (percent of the last valid frequency) to count as throttling
    pub drop_percent: f64,
    /// Throttling is only flagged above this temperature
    pub heat_c: f64,
    pub warning_temp_c: f64,
    pub critical_temp_c: f64,
    /// Final score needed for a PASSED verdict
    pub pass_score: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            noise_floor_mhz: 100.0,
            drop_percent: 15.0,
            heat_c: 70.0,
            warning_temp_c: 80.0,
            critical_temp_c: 95.0,
            pass_score: 85.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Rate,
}

/// How a command workload's output becomes a `Metric`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParserConfig {
    /// Exit status 0 is a pass, anything else a fail
    ExitStatus,
    /// First capture group of `pattern` is the metric value
    Pattern {
        pattern: String,
        metric: MetricKind,
        unit: String,
    },
    /// `KEY=VALUE` lines; `result_key` must equal `pass_value`,
    /// `value_key` (if set) supplies a counter metric
    KeyValue {
        #[serde(default = "default_result_key")]
        result_key: String,
        #[serde(default = "default_pass_value")]
        pass_value: String,
        #[serde(default)]
        value_key: Option<String>,
        #[serde(default)]
        unit: String,
    },
}

fn default_result_key() -> String {
    "RESULT".to_string()
}

fn default_pass_value() -> String {
    "PASSED".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    /// Shell command; `{duration}` (seconds) and `{instance}` are substituted
    pub command: String,
    pub parser: ParserConfig,
    /// Expected metric value for ratio scoring
    #[serde(default)]
    pub baseline: Option<f64>,
    /// Number of copies to launch (e.g. one per core)
    #[serde(default = "default_instances")]
    pub instances: u32,
}

fn default_instances() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    /// Contribution to the final score; all weights sum to 100
    pub weight: f64,
    /// Percentage of the session budget
    #[serde(default)]
    pub share_percent: f64,
    /// Fixed allotment, overrides `share_percent`
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub mode: ExecutionMode,
    pub scoring: ScoringRule,
    pub workloads: Vec<WorkloadConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EccConfig {
    pub enabled: bool,
    /// Phase charged with uncorrectable errors
    pub phase: String,
    pub command: String,
}

impl Default for EccConfig {
    fn default() -> Self {
        EccConfig {
            enabled: true,
            phase: "pattern".to_string(),
            command: DEFAULT_ECC_COMMAND.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub target: TargetConfig,
    pub total_duration_secs: u64,
    pub sample_interval_secs: u64,
    /// Smallest allotment any phase may receive
    pub min_phase_secs: u64,
    /// Phase that absorbs the time other phases need to reach the minimum
    pub filler_phase: Option<String>,
    /// Extra time past its allotment before a workload is cancelled
    pub workload_grace_secs: u64,
    /// Time a cancelled workload gets to wind down before it is abandoned
    pub cancel_grace_secs: u64,
    pub thresholds: Thresholds,
    /// Phase name -> weight, applied on top of the phase table
    pub weight_overrides: BTreeMap<String, f64>,
    pub phases: Vec<PhaseConfig>,
    pub probe_command: String,
    pub ecc: EccConfig,
    pub report_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            target: TargetConfig::default(),
            total_duration_secs: 600,
            sample_interval_secs: 5,
            min_phase_secs: 30,
            filler_phase: Some("thermal".to_string()),
            workload_grace_secs: 10,
            cancel_grace_secs: 5,
            thresholds: Thresholds::default(),
            weight_overrides: BTreeMap::new(),
            phases: default_phases(),
            probe_command: DEFAULT_PROBE_COMMAND.to_string(),
            ecc: EccConfig::default(),
            report_dir: PathBuf::from("reports"),
        }
    }
}

impl HarnessConfig {
    pub fn total_duration(&self) -> Duration {
        Duration::from_secs(self.total_duration_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.target.connect_timeout_secs)
    }

    /// Phase table with `weight_overrides` applied.
    pub fn effective_phases(&self) -> Vec<PhaseConfig> {
        self.phases
            .iter()
            .cloned()
            .map(|mut phase| {
                if let Some(weight) = self.weight_overrides.get(&phase.name) {
                    phase.weight = *weight;
                }
                phase
            })
            .collect()
    }
}

fn busy_loop(name: &str, instances: u32, parser: ParserConfig) -> WorkloadConfig {
    WorkloadConfig {
        name: name.to_string(),
        command: BUSY_LOOP_COMMAND.to_string(),
        parser,
        baseline: None,
        instances,
    }
}

fn ops_counter() -> ParserConfig {
    ParserConfig::Pattern {
        pattern: r"ops=(\d+)".to_string(),
        metric: MetricKind::Counter,
        unit: "iterations".to_string(),
    }
}

/// single-core 20, multi-core 25, per-unit 15, micro-benchmark 10, pattern 10,
/// thermal 20. Multi-core and per-unit run side by side.
pub fn default_phases() -> Vec<PhaseConfig> {
    vec![
        PhaseConfig {
            name: "single_core".to_string(),
            weight: 20.0,
            share_percent: 20.0,
            duration_secs: None,
            mode: ExecutionMode::Sequential,
            scoring: ScoringRule::Ratio,
            workloads: vec![busy_loop("busy_loop", 1, ops_counter())],
        },
        PhaseConfig {
            name: "multi_core".to_string(),
            weight: 25.0,
            share_percent: 25.0,
            duration_secs: None,
            mode: ExecutionMode::Parallel,
            scoring: ScoringRule::Ratio,
            workloads: vec![busy_loop("busy_loop_all", 4, ops_counter())],
        },
        PhaseConfig {
            name: "per_unit".to_string(),
            weight: 15.0,
            share_percent: 15.0,
            duration_secs: None,
            mode: ExecutionMode::Parallel,
            scoring: ScoringRule::PassFail,
            workloads: vec![busy_loop("unit_check", 4, ParserConfig::ExitStatus)],
        },
        PhaseConfig {
            name: "micro_benchmark".to_string(),
            weight: 10.0,
            share_percent: 10.0,
            duration_secs: None,
            mode: ExecutionMode::Sequential,
            scoring: ScoringRule::Ratio,
            workloads: vec![WorkloadConfig {
                name: "memory_copy".to_string(),
                command: "dd if=/dev/zero of=/dev/null bs=1M count=4096 2>&1 | tail -n1".to_string(),
                parser: ParserConfig::Pattern {
                    pattern: r"([0-9.]+) GB/s".to_string(),
                    metric: MetricKind::Rate,
                    unit: "GB/s".to_string(),
                },
                baseline: None,
                instances: 1,
            }],
        },
        PhaseConfig {
            name: "pattern".to_string(),
            weight: 10.0,
            share_percent: 10.0,
            duration_secs: None,
            mode: ExecutionMode::Sequential,
            scoring: ScoringRule::PassFail,
            workloads: vec![WorkloadConfig {
                name: "ram_patterns".to_string(),
                command: "python3 comprehensive_ram_test.py 256 {duration} >/dev/null; cat /tmp/comprehensive_ram_test_result.txt"
                    .to_string(),
                parser: ParserConfig::KeyValue {
                    result_key: default_result_key(),
                    pass_value: default_pass_value(),
                    value_key: Some("TOTAL_ERRORS".to_string()),
                    unit: "errors".to_string(),
                },
                baseline: None,
                instances: 1,
            }],
        },
        PhaseConfig {
            name: "thermal".to_string(),
            weight: 20.0,
            share_percent: 20.0,
            duration_secs: None,
            mode: ExecutionMode::Sequential,
            scoring: ScoringRule::Thermal,
            workloads: vec![busy_loop("sustained_load", 4, ParserConfig::ExitStatus)],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_100() {
        let total: f64 = default_phases().iter().map(|p| p.weight).sum();
        assert_eq!(total, 100.0);
        let shares: f64 = default_phases().iter().map(|p| p.share_percent).sum();
        assert!(shares <= 100.0);
    }

    #[test]
    fn test_weight_overrides_applied() {
        let mut config = HarnessConfig::default();
        config.weight_overrides.insert("single_core".to_string(), 30.0);
        config.weight_overrides.insert("thermal".to_string(), 10.0);
        let phases = config.effective_phases();
        let single = phases.iter().find(|p| p.name == "single_core").unwrap();
        let thermal = phases.iter().find(|p| p.name == "thermal").unwrap();
        assert_eq!(single.weight, 30.0);
        assert_eq!(thermal.weight, 10.0);
        // the table itself is untouched
        assert_eq!(config.phases[0].weight, 20.0);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
            total_duration_secs = 1200

            [target]
            address = "dut-07"
            command_prefix = ["ssh", "root@dut-07"]
            "#,
        )
        .unwrap();
        assert_eq!(config.total_duration_secs, 1200);
        assert_eq!(config.target.address, "dut-07");
        assert_eq!(config.target.connect_timeout_secs, 10);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.phases.len(), 6);
    }
}
