//! Splitting the session budget into per-phase allotments.
//!
//! Share-derived allotments that fall under the minimum are raised to it and
//! the filler phase gives up exactly the time that was added. Explicit
//! durations are taken as given. Allotments never add up to more than the
//! session budget; when they would, allocation fails before anything runs.

use std::time::Duration;

use crate::error::{HarnessError, Result};

/// What one phase asks of the budget.
#[derive(Clone, Debug, PartialEq)]
pub struct BudgetRequest {
    pub name: String,
    /// Percentage of the session budget
    pub share_percent: f64,
    /// Fixed allotment, overrides the share
    pub duration: Option<Duration>,
}

impl BudgetRequest {
    pub fn share(name: impl Into<String>, share_percent: f64) -> Self {
        BudgetRequest {
            name: name.into(),
            share_percent,
            duration: None,
        }
    }

    pub fn fixed(name: impl Into<String>, duration: Duration) -> Self {
        BudgetRequest {
            name: name.into(),
            share_percent: 0.0,
            duration: Some(duration),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Allotments in the order of `requests`, at millisecond resolution.
pub fn allocate_budget(
    total: Duration,
    requests: &[BudgetRequest],
    min_phase: Duration,
    filler: Option<&str>,
) -> Result<Vec<Duration>> {
    let total_ms = millis(total);
    let min_ms = millis(min_phase);

    let mut allotments: Vec<u64> = requests
        .iter()
        .map(|r| match r.duration {
            Some(d) => millis(d),
            None => (total_ms as f64 * r.share_percent / 100.0).floor() as u64,
        })
        .collect();

    let requested: u64 = allotments.iter().sum();
    if requested > total_ms {
        return Err(HarnessError::Configuration(format!(
            "Phase allotments add up to {:?}, more than the session budget of {:?}",
            Duration::from_millis(requested),
            total
        )));
    }

    let filler_idx = match filler {
        Some(name) => Some(requests.iter().position(|r| r.name == name).ok_or_else(|| {
            HarnessError::Configuration(format!("Filler phase '{}' is not in the phase list", name))
        })?),
        None => None,
    };

    let mut raised = 0u64;
    for (i, request) in requests.iter().enumerate() {
        if Some(i) == filler_idx || request.duration.is_some() {
            continue;
        }
        if allotments[i] < min_ms {
            let delta = min_ms - allotments[i];
            log::debug!(
                "[Scheduler] Raising '{}' from {:?} to the {:?} minimum",
                request.name,
                Duration::from_millis(allotments[i]),
                min_phase
            );
            allotments[i] = min_ms;
            raised += delta;
        }
    }

    if raised > 0 {
        match filler_idx {
            Some(idx) => {
                let remaining = allotments[idx].saturating_sub(raised);
                if allotments[idx] < raised || remaining < min_ms {
                    return Err(HarnessError::Configuration(format!(
                        "Filler phase '{}' cannot give up {:?} and keep the {:?} minimum",
                        requests[idx].name,
                        Duration::from_millis(raised),
                        min_phase
                    )));
                }
                allotments[idx] = remaining;
            }
            None => {
                if requested + raised > total_ms {
                    return Err(HarnessError::Configuration(format!(
                        "Raising phases to the {:?} minimum exceeds the session budget and no filler phase is set",
                        min_phase
                    )));
                }
            }
        }
    }

    Ok(allotments.into_iter().map(Duration::from_millis).collect())
}
