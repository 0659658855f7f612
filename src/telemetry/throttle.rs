//! Frequency-drop-under-heat throttle heuristic.
//!
//! Stateful and order dependent: samples must be fed in arrival order by a
//! single consumer (the sampler task owns the detector).

use crate::config::Thresholds;
use crate::models::{TelemetrySample, ThrottleEvent};

#[derive(Clone, Debug)]
pub struct ThrottleDetector {
    noise_floor_mhz: f64,
    drop_percent: f64,
    heat_c: f64,
    last_valid_frequency: Option<f64>,
}

impl ThrottleDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        ThrottleDetector {
            noise_floor_mhz: thresholds.noise_floor_mhz,
            drop_percent: thresholds.drop_percent,
            heat_c: thresholds.heat_c,
            last_valid_frequency: None,
        }
    }

    pub fn last_valid_frequency(&self) -> Option<f64> {
        self.last_valid_frequency
    }

    /// Feed the next sample. Returns an event when the clock fell more than
    /// the drop threshold below the last warmed-up reading while the target
    /// was above the heat threshold.
    ///
    /// Readings at or below the noise floor (cold start, idle sensor glitches)
    /// neither raise events nor become the new baseline.
    pub fn observe(&mut self, sample: &TelemetrySample) -> Option<ThrottleEvent> {
        let frequency = sample.frequency_mhz.filter(|f| *f > self.noise_floor_mhz)?;
        let previous = self.last_valid_frequency.replace(frequency)?;

        let drop_percent = (previous - frequency) / previous * 100.0;
        let temperature = sample.temperature_c?;
        if drop_percent > self.drop_percent && temperature > self.heat_c {
            log::warn!(
                "[Throttle] {:.0} -> {:.0} MHz ({:.1}% drop) at {:.1}°C",
                previous,
                frequency,
                drop_percent,
                temperature
            );
            return Some(ThrottleEvent {
                timestamp: sample.timestamp,
                drop_percent,
                previous_frequency_mhz: previous,
                frequency_mhz: frequency,
                temperature_c: temperature,
            });
        }
        None
    }
}
