//! Poller state, lifecycle status and per-cadence results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerStatus {
    #[default]
    Idle,
    Running,
    ShuttingDown,
    Stopped,
    /// The background worker died without going through `stop()`.
    Errored,
}

/// Progress and counters of one poller instance.
///
/// `last_marker` never moves backwards; failed cadences only bump
/// the counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PollerState {
    pub last_marker: Option<DateTime<Utc>>,
    pub total_cadences: u64,
    pub total_items: u64,
    pub total_errors: u64,
    pub status: PollerStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PollerState {
    /// Move the marker forward. Returns `false` (and changes nothing)
    /// if `to` is not newer than the current marker.
    pub fn advance_marker(&mut self, to: DateTime<Utc>) -> bool {
        match self.last_marker {
            Some(current) if current >= to => false,
            _ => {
                self.last_marker = Some(to);
                true
            }
        }
    }

    pub fn record_success(&mut self, attempted_at: DateTime<Utc>, items: usize, marker: DateTime<Utc>) {
        self.total_cadences += 1;
        self.total_items += items as u64;
        self.last_attempt_at = Some(attempted_at);
        self.last_error = None;
        self.advance_marker(marker);
    }

    pub fn record_failure(&mut self, attempted_at: DateTime<Utc>, error: &FetchError) {
        self.total_cadences += 1;
        self.total_errors += 1;
        self.last_attempt_at = Some(attempted_at);
        self.last_error = Some(error.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollFailure {
    pub kind: &'static str,
    pub message: String,
}

impl From<&FetchError> for PollFailure {
    fn from(err: &FetchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one cadence. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    pub success: bool,
    pub items_found: usize,
    pub error: Option<PollFailure>,
    pub attempted_at: DateTime<Utc>,
    pub attempts: u32,
    pub duration_ms: u64,
}
