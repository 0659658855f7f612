//! Session lifecycle state.
//!
//! `Created → Running → (Aborted | Scored)`. Both terminal states are final;
//! a session that ran to the end is always Scored, even when every phase
//! failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Phase list resolved, nothing executed yet
    Created,

    /// Sampler started, phases executing
    Running,

    /// Target unreachable; no score was computed
    Aborted,

    /// All phases finished and the score card is final
    Scored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Aborted => "aborted",
            SessionState::Scored => "scored",
        }
    }

    pub fn valid_next_states(&self) -> Vec<SessionState> {
        match self {
            // connectivity check happens before Running
            SessionState::Created => vec![SessionState::Running, SessionState::Aborted],
            SessionState::Running => vec![SessionState::Aborted, SessionState::Scored],
            SessionState::Aborted => vec![],
            SessionState::Scored => vec![],
        }
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        self.valid_next_states().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_next_states().is_empty()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the timestamps of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTracker {
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        SessionTracker {
            state: SessionState::Created,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn transition_to(&mut self, next: SessionState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "Invalid session transition: {} -> {}",
                self.state.as_str(),
                next.as_str()
            ));
        }
        let now = Utc::now();
        if next == SessionState::Running || self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        log::debug!("[Scheduler] Session {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Record the abort reason and move to `Aborted`.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), String> {
        self.error = Some(reason.into());
        self.transition_to(SessionState::Aborted)
    }
}
