//! Out-of-band telemetry: probe parsing, periodic sampling, throttle
//! detection, ECC counters and the summary handed to the scorer.

pub mod ecc;
pub mod probe;
pub mod sampler;
pub mod throttle;

pub use ecc::{EccDelta, EccMonitor};
pub use probe::ProbeParser;
pub use sampler::{SamplerHandle, SamplerSettings, SamplerStats, TelemetrySampler};
pub use throttle::ThrottleDetector;

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::models::TelemetrySample;

/// Fraction of missing samples above which the run gets a telemetry warning.
pub const MISSING_SAMPLE_WARN_RATIO: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl Stat {
    /// `None` when there is nothing to summarize.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Stat> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| Stat {
            min,
            avg: sum / count as f64,
            max,
        })
    }
}

/// Min/avg/max over the samples that actually carried a reading.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub sample_count: usize,
    pub missing_count: usize,
    pub temperature_c: Option<Stat>,
    pub frequency_mhz: Option<Stat>,
    pub utilization_pct: Option<Stat>,
    /// Samples at or above the warning temperature
    pub warning_samples: usize,
    /// Samples at or above the critical temperature
    pub critical_samples: usize,
    pub throttle_events: usize,
}

impl TelemetrySummary {
    pub fn compute(
        samples: &[TelemetrySample],
        throttle_events: usize,
        thresholds: &Thresholds,
    ) -> Self {
        let temps = || samples.iter().filter_map(|s| s.temperature_c);
        TelemetrySummary {
            sample_count: samples.len(),
            missing_count: samples.iter().filter(|s| s.is_missing()).count(),
            temperature_c: Stat::from_values(temps()),
            frequency_mhz: Stat::from_values(samples.iter().filter_map(|s| s.frequency_mhz)),
            utilization_pct: Stat::from_values(samples.iter().filter_map(|s| s.utilization_pct)),
            warning_samples: temps().filter(|t| *t >= thresholds.warning_temp_c).count(),
            critical_samples: temps().filter(|t| *t >= thresholds.critical_temp_c).count(),
            throttle_events,
        }
    }

    pub fn missing_ratio(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.missing_count as f64 / self.sample_count as f64
    }

    pub fn peak_temperature(&self) -> Option<f64> {
        self.temperature_c.map(|s| s.max)
    }

    pub fn reached_critical(&self) -> bool {
        self.critical_samples > 0
    }

    /// Telemetry conditions that count toward the warning penalty, one
    /// message per condition.
    pub fn warnings(&self, thresholds: &Thresholds) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.sample_count == 0 {
            warnings.push("no telemetry samples collected".to_string());
        } else if self.missing_ratio() > MISSING_SAMPLE_WARN_RATIO {
            warnings.push(format!(
                "{} of {} telemetry samples missing",
                self.missing_count, self.sample_count
            ));
        }
        if self.warning_samples > 0 {
            warnings.push(format!(
                "{} samples at or above {:.0}°C (peak {:.1}°C)",
                self.warning_samples,
                thresholds.warning_temp_c,
                self.peak_temperature().unwrap_or(thresholds.warning_temp_c)
            ));
        }
        warnings
    }
}
