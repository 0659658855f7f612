//! Periodic telemetry sampling for the lifetime of a session.
//!
//! The sampler is one long-lived task, independent of phase boundaries. It
//! owns the `ThrottleDetector`, so samples reach the detector strictly in
//! arrival order; samples and events are pushed into the `ResultAggregator`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::probe::ProbeParser;
use super::throttle::ThrottleDetector;
use crate::aggregator::ResultAggregator;
use crate::error::{ExecError, HarnessError};
use crate::models::TelemetrySample;
use crate::target::{wait_cancelled, RemoteExecutor};

/// Floor for the tick period and probe timeout; `tokio::time::interval`
/// panics on a zero period.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub probe_command: String,
    /// Upper bound for one probe read
    pub probe_timeout: Duration,
}

impl SamplerSettings {
    pub fn new(interval: Duration, probe_command: impl Into<String>) -> Self {
        SamplerSettings {
            interval,
            probe_command: probe_command.into(),
            probe_timeout: interval,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerStats {
    pub samples: u64,
    pub missing: u64,
    pub throttle_events: u64,
}

pub struct TelemetrySampler;

impl TelemetrySampler {
    /// Spawn the sampling task. The first sample is taken immediately.
    pub fn start(
        executor: Arc<dyn RemoteExecutor>,
        settings: SamplerSettings,
        detector: ThrottleDetector,
        aggregator: ResultAggregator,
    ) -> SamplerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        log::info!(
            "[Sampler] Starting telemetry sampling every {:?}",
            settings.interval
        );
        let join = tokio::spawn(sample_loop(executor, settings, detector, aggregator, stop_rx));
        SamplerHandle { stop_tx, join }
    }
}

/// Stops the sampler; dropping the handle without `stop()` also ends the task
/// at its next tick.
pub struct SamplerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<SamplerStats>,
}

impl SamplerHandle {
    /// Signal the task and wait for it; an in-flight probe is cancelled.
    pub async fn stop(self) -> SamplerStats {
        let _ = self.stop_tx.send(true);
        match self.join.await {
            Ok(stats) => {
                log::info!(
                    "[Sampler] Stopped after {} samples ({} missing, {} throttle events)",
                    stats.samples,
                    stats.missing,
                    stats.throttle_events
                );
                stats
            }
            Err(e) => {
                log::error!("[Sampler] Sampling task failed: {}", e);
                SamplerStats::default()
            }
        }
    }
}

async fn sample_loop(
    executor: Arc<dyn RemoteExecutor>,
    settings: SamplerSettings,
    mut detector: ThrottleDetector,
    aggregator: ResultAggregator,
    mut stop_rx: watch::Receiver<bool>,
) -> SamplerStats {
    let mut parser = ProbeParser::new();
    let mut stats = SamplerStats::default();
    if settings.interval < MIN_SAMPLE_INTERVAL {
        log::warn!(
            "[Sampler] Interval {:?} raised to {:?}",
            settings.interval,
            MIN_SAMPLE_INTERVAL
        );
    }
    let probe_timeout = settings.probe_timeout.max(MIN_SAMPLE_INTERVAL);
    let mut ticker = tokio::time::interval(settings.interval.max(MIN_SAMPLE_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = wait_cancelled(&mut stop_rx) => break,
            _ = ticker.tick() => {}
        }

        let result = executor
            .execute(&settings.probe_command, probe_timeout, stop_rx.clone())
            .await;
        let sample = match result {
            Ok(output) if output.success() => parser.parse(&output.stdout, Utc::now()),
            Ok(output) => {
                log::debug!(
                    "[Sampler] Probe exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                );
                TelemetrySample::missing(Utc::now())
            }
            Err(ExecError::Cancelled) => break,
            Err(e) => {
                log::debug!("[Sampler] {}", HarnessError::TelemetryUnavailable(e.to_string()));
                TelemetrySample::missing(Utc::now())
            }
        };

        stats.samples += 1;
        if sample.is_missing() {
            stats.missing += 1;
        }
        if let Some(event) = detector.observe(&sample) {
            stats.throttle_events += 1;
            aggregator.record_throttle(event);
        }
        aggregator.record_sample(sample);
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::target::{ScriptedExecutor, ScriptedResponse};

    fn reading(freq_mhz: u32, temp_c: u32) -> ScriptedResponse {
        ScriptedResponse::output(format!("freq_mhz={}\ntemp_c={}\n", freq_mhz, temp_c))
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_every_interval_until_stopped() {
        let exec = ScriptedExecutor::new().on("probe", reading(1800, 55));
        let aggregator = ResultAggregator::new();
        let handle = TelemetrySampler::start(
            Arc::new(exec.clone()),
            SamplerSettings::new(Duration::from_secs(5), "probe"),
            ThrottleDetector::new(&Thresholds::default()),
            aggregator.clone(),
        );

        // ticks at 0, 5, 10, 15, 20
        tokio::time::sleep(Duration::from_secs(22)).await;
        let stats = handle.stop().await;

        assert_eq!(stats.samples, 5);
        assert_eq!(stats.missing, 0);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.telemetry.len(), 5);
        assert_eq!(snapshot.telemetry[0].frequency_mhz, Some(1800.0));
        assert_eq!(exec.invocation_count("probe"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_samples() {
        let exec = ScriptedExecutor::new().on("probe", reading(1800, 55));
        let handle = TelemetrySampler::start(
            Arc::new(exec),
            SamplerSettings::new(Duration::ZERO, "probe"),
            ThrottleDetector::new(&Thresholds::default()),
            ResultAggregator::new(),
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
        let stats = handle.stop().await;
        assert!(stats.samples >= 2, "sampler died: {:?}", stats);
        assert_eq!(stats.missing, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_is_missing_sample() {
        let exec = ScriptedExecutor::new().on_sequence(
            "probe",
            vec![
                reading(1800, 55),
                ScriptedResponse::fail(1, "no sensors"),
                ScriptedResponse::Hang,
            ],
        );
        let aggregator = ResultAggregator::new();
        let handle = TelemetrySampler::start(
            Arc::new(exec),
            SamplerSettings::new(Duration::from_secs(1), "probe"),
            ThrottleDetector::new(&Thresholds::default()),
            aggregator.clone(),
        );
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let stats = handle.stop().await;

        assert!(stats.samples >= 3);
        assert_eq!(stats.missing, stats.samples - 1);
        let snapshot = aggregator.snapshot();
        assert!(!snapshot.telemetry[0].is_missing());
        assert!(snapshot.telemetry[1].is_missing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_events_reach_aggregator() {
        let exec = ScriptedExecutor::new().on_sequence(
            "probe",
            vec![reading(0, 40), reading(2000, 70), reading(1500, 80), reading(1500, 81)],
        );
        let aggregator = ResultAggregator::new();
        let handle = TelemetrySampler::start(
            Arc::new(exec),
            SamplerSettings::new(Duration::from_secs(1), "probe"),
            ThrottleDetector::new(&Thresholds::default()),
            aggregator.clone(),
        );
        tokio::time::sleep(Duration::from_millis(4500)).await;
        let stats = handle.stop().await;

        assert_eq!(stats.throttle_events, 1);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.throttle_events.len(), 1);
        assert_eq!(snapshot.throttle_events[0].frequency_mhz, 1500.0);
    }
}
