//! Replay synchronization status
//!
//! A replay is created in `Processing`, moves to a terminal state
//! (`Completed` or `Failed`) once the external analysis finishes, and only
//! leaves a terminal state through an explicit reprocess (`Reprocessing`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Lifecycle state of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStatus {
    /// Submitted, waiting for the external analysis
    Processing,
    /// Terminal: analysis finished and results reconciled
    Completed,
    /// Terminal: the external analysis failed
    Failed,
    /// Reset by an operator; polled exactly like `Processing`
    Reprocessing,
}

impl ReplayStatus {
    pub const ALL: [ReplayStatus; 4] = [
        ReplayStatus::Processing,
        ReplayStatus::Completed,
        ReplayStatus::Failed,
        ReplayStatus::Reprocessing,
    ];

    /// Statuses the scheduler polls
    pub const PENDING: [ReplayStatus; 2] = [ReplayStatus::Processing, ReplayStatus::Reprocessing];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayStatus::Processing => "processing",
            ReplayStatus::Completed => "completed",
            ReplayStatus::Failed => "failed",
            ReplayStatus::Reprocessing => "reprocessing",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayStatus::Completed | ReplayStatus::Failed)
    }

    /// Allowed edges:
    /// - processing/reprocessing -> completed/failed (sync)
    /// - completed/failed -> reprocessing (reprocess)
    pub fn can_transition_to(&self, next: ReplayStatus) -> bool {
        match (self, next) {
            (ReplayStatus::Processing | ReplayStatus::Reprocessing, to) => to.is_terminal(),
            (ReplayStatus::Completed | ReplayStatus::Failed, ReplayStatus::Reprocessing) => true,
            _ => false,
        }
    }

    /// Terminal states carry a processed timestamp, all others must not
    pub fn requires_processed_at(&self) -> bool {
        self.is_terminal()
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplayStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ReplayStatus::Processing),
            "completed" => Ok(ReplayStatus::Completed),
            "failed" => Ok(ReplayStatus::Failed),
            "reprocessing" => Ok(ReplayStatus::Reprocessing),
            other => Err(Error::InvalidInput(format!("Unknown replay status: {}", other))),
        }
    }
}
