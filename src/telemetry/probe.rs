//! Parser for the telemetry probe output.
//!
//! The probe prints one reading per line:
//!
//! ```text
//! temp_milli=54000        # thermal zone, millidegrees
//! temp_c=54.0             # thermal zone, degrees
//! freq_khz=2400000        # one core's current clock
//! freq_mhz=2400
//! util_pct=87.5
//! cpu  4705 150 1120 16250 520 0 20 0 0 0    # raw /proc/stat line
//! ```
//!
//! Sensors that are absent or report nonsense are dropped rather than counted
//! as zero. Utilization from the raw `cpu` line needs two consecutive samples,
//! so the parser keeps the previous counters.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::TelemetrySample;

static READING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(temp_milli|temp_c|freq_khz|freq_mhz|util_pct)\s*=\s*(-?[0-9]+(?:\.[0-9]+)?)\s*$")
        .expect("Invalid probe reading regex")
});

static CPU_STAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*cpu\s+([0-9 ]+)$").expect("Invalid /proc/stat regex"));

/// Plausible sensor range; anything outside is a broken or absent sensor.
const MIN_VALID_TEMP_C: f64 = 0.0;
const MAX_VALID_TEMP_C: f64 = 150.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

impl CpuTimes {
    /// user nice system idle iowait irq softirq steal [guest guest_nice]
    fn parse(fields: &str) -> Option<CpuTimes> {
        let values: Vec<u64> = fields
            .split_whitespace()
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .ok()?;
        if values.len() < 4 {
            return None;
        }
        // guest time is already included in user/nice
        let total = values.iter().take(8).sum();
        let idle = values[3] + values.get(4).copied().unwrap_or(0);
        Some(CpuTimes { idle, total })
    }
}

#[derive(Debug, Default)]
pub struct ProbeParser {
    last_cpu: Option<CpuTimes>,
}

impl ProbeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, output: &str, timestamp: DateTime<Utc>) -> TelemetrySample {
        let mut zones = Vec::new();
        let mut freqs = Vec::new();
        let mut util = None;
        let mut cpu_times = None;

        for line in output.lines() {
            if let Some(caps) = READING_RE.captures(line) {
                let Ok(value) = caps[2].parse::<f64>() else {
                    continue;
                };
                match &caps[1] {
                    "temp_milli" => push_temperature(&mut zones, value / 1000.0),
                    "temp_c" => push_temperature(&mut zones, value),
                    "freq_khz" if value > 0.0 => freqs.push(value / 1000.0),
                    "freq_mhz" if value > 0.0 => freqs.push(value),
                    "util_pct" if (0.0..=100.0).contains(&value) => util = Some(value),
                    _ => {}
                }
            } else if let Some(caps) = CPU_STAT_RE.captures(line) {
                cpu_times = CpuTimes::parse(&caps[1]);
            }
        }

        if let Some(current) = cpu_times {
            if util.is_none() {
                util = self.utilization_since_last(current);
            }
            self.last_cpu = Some(current);
        }

        let frequency_mhz = (!freqs.is_empty()).then(|| freqs.iter().sum::<f64>() / freqs.len() as f64);

        TelemetrySample {
            timestamp,
            temperature_c: zones.iter().copied().reduce(f64::max),
            zone_temperatures_c: zones,
            frequency_mhz,
            utilization_pct: util,
        }
    }

    fn utilization_since_last(&self, current: CpuTimes) -> Option<f64> {
        let last = self.last_cpu?;
        let total = current.total.checked_sub(last.total)?;
        let idle = current.idle.checked_sub(last.idle)?;
        if total == 0 {
            return None;
        }
        let busy = total.saturating_sub(idle) as f64;
        Some((busy / total as f64 * 100.0).clamp(0.0, 100.0))
    }
}

fn push_temperature(zones: &mut Vec<f64>, celsius: f64) {
    if celsius > MIN_VALID_TEMP_C && celsius < MAX_VALID_TEMP_C {
        zones.push(celsius);
    }
}
