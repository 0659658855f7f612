//! Everything a report renderer needs from a finished session.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::aggregator::AggregatorSnapshot;
use crate::orchestrator::state::SessionState;
use crate::scoring::ScoreCard;
use crate::telemetry::{EccDelta, SamplerStats, TelemetrySummary};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub target: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub score_card: ScoreCard,
    /// Raw per-phase results, telemetry stream, throttle events and warnings
    pub snapshot: AggregatorSnapshot,
    pub telemetry: TelemetrySummary,
    pub sampler: SamplerStats,
    /// `None` when ECC monitoring was off or unsupported
    pub ecc: Option<EccDelta>,
}

impl SessionReport {
    /// 0 = PASSED, 1 = FAILED, 2 = ABORTED/UNAVAILABLE
    pub fn exit_code(&self) -> i32 {
        match self.state {
            SessionState::Scored => self.score_card.verdict.exit_code(),
            _ => 2,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write `validation_<target>_<local time>.json` into `dir`.
    pub fn write_json(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let target: String = self
            .target
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("validation_{}_{}.json", target, stamp));
        fs::write(&path, self.to_json_pretty()?)?;
        log::info!("[Report] Wrote {}", path.display());
        Ok(path)
    }

    /// One-line outcome for the console.
    pub fn summary_line(&self) -> String {
        let card = &self.score_card;
        match &card.abort_reason {
            Some(reason) => format!("{}: {} ({})", self.target, card.health, reason),
            None if card.responsible_phases.is_empty() => format!(
                "{}: {} {:.1}/100 ({})",
                self.target, card.verdict, card.final_score, card.health
            ),
            None => format!(
                "{}: {} {:.1}/100 ({}), weak phases: {}",
                self.target,
                card.verdict,
                card.final_score,
                card.health,
                card.responsible_phases.join(", ")
            ),
        }
    }
}
