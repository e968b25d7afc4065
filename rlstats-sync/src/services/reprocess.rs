//! Reprocess controller
//!
//! Unwinds a terminal replay's derived data and puts it back in the sync
//! queue as `reprocessing`.

use chrono::Utc;
use rlstats_common::events::{EventBus, SyncEvent};
use rlstats_common::{Error, ReplayStatus};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{players, replays, teams};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

#[derive(Debug, Error)]
pub enum ReprocessError {
    #[error("Replay not found: {0}")]
    NotFound(Uuid),

    #[error("Replay {id} is {status}; only completed or failed replays can be reprocessed")]
    NotTerminal { id: Uuid, status: ReplayStatus },

    #[error("Store error: {0}")]
    Store(#[from] Error),
}

/// What `reprocess_one` removed
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReprocessReport {
    pub replay_id: Uuid,
    pub previous_status: Option<ReplayStatus>,
    pub players_removed: u64,
    pub teams_removed: Vec<Uuid>,
    /// Teams left in place because another replay still references them
    pub teams_skipped: Vec<Uuid>,
    pub orphan_players_removed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub replay_id: Uuid,
    pub error: String,
}

/// Counts for a reprocess-all run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Replays not in a terminal state
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<BatchFailure>,
    pub orphan_players_removed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
}

impl BatchSummary {
    /// Nothing succeeded and something failed
    pub fn is_total_failure(&self) -> bool {
        self.listing_error.is_some() || (self.failed > 0 && self.succeeded == 0)
    }
}

pub struct ReprocessController {
    db: SqlitePool,
    event_bus: EventBus,
}

impl ReprocessController {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    /// Reset one completed/failed replay to `reprocessing`
    ///
    /// Player-instances of both teams are detached and deleted, the replay's
    /// team links and `processed_at` are cleared, then the teams themselves
    /// are deleted unless another replay still points at them. Finishes with
    /// the system-wide orphan player sweep.
    pub async fn reprocess_one(&self, replay_id: Uuid) -> Result<ReprocessReport, ReprocessError> {
        let mut report = self.unwind(replay_id).await?;
        report.orphan_players_removed = self.cleanup_orphan_players().await?;
        Ok(report)
    }

    /// Reprocess every known replay, continuing past individual failures
    pub async fn reprocess_all(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();

        let ids = match replays::list_all_ids(&self.db).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list replays for reprocessing");
                summary.listing_error = Some(e.to_string());
                return summary;
            }
        };

        summary.total = ids.len();
        info!(total = summary.total, "Reprocessing all replays");

        for replay_id in ids {
            match self.unwind(replay_id).await {
                Ok(_) => summary.succeeded += 1,
                Err(ReprocessError::NotTerminal { status, .. }) => {
                    info!(%replay_id, %status, "Skipping replay still being synced");
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!(%replay_id, error = %e, "Reprocess failed");
                    summary.failed += 1;
                    summary.failures.push(BatchFailure {
                        replay_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        match self.cleanup_orphan_players().await {
            Ok(removed) => summary.orphan_players_removed = removed,
            Err(e) => warn!(error = %e, "Orphan player cleanup failed"),
        }

        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reprocess batch finished"
        );
        summary
    }

    /// Delete every player-instance with no team; returns the number removed
    pub async fn cleanup_orphan_players(&self) -> Result<u64, ReprocessError> {
        let removed = retry_on_lock("delete orphan players", DEFAULT_MAX_LOCK_WAIT, || {
            players::delete_orphan_players(&self.db)
        })
        .await?;

        if removed > 0 {
            warn!(removed, "Removed orphaned player-instances");
        }
        Ok(removed)
    }

    async fn unwind(&self, replay_id: Uuid) -> Result<ReprocessReport, ReprocessError> {
        let unwound = retry_on_lock("reprocess replay", DEFAULT_MAX_LOCK_WAIT, || async {
            let mut tx = self.db.begin().await?;
            let outcome = unwind_in(&mut tx, replay_id).await?;
            if matches!(outcome, Unwound::Done(_)) {
                tx.commit().await?;
            }
            Ok(outcome)
        })
        .await?;

        let report = match unwound {
            Unwound::Done(report) => report,
            Unwound::Missing => return Err(ReprocessError::NotFound(replay_id)),
            Unwound::NotTerminal(status) => {
                return Err(ReprocessError::NotTerminal {
                    id: replay_id,
                    status,
                })
            }
        };

        if let Some(previous) = report.previous_status {
            let external_id = replays::find_by_id(&self.db, replay_id)
                .await?
                .and_then(|r| r.external_id);
            self.event_bus.emit_lossy(SyncEvent::ReplayStatusChanged {
                replay_id,
                external_id,
                old_status: previous,
                new_status: ReplayStatus::Reprocessing,
                timestamp: Utc::now(),
            });
        }

        info!(
            %replay_id,
            players_removed = report.players_removed,
            teams_removed = report.teams_removed.len(),
            teams_skipped = report.teams_skipped.len(),
            "Replay reset for reprocessing"
        );
        Ok(report)
    }
}

enum Unwound {
    Done(ReprocessReport),
    Missing,
    NotTerminal(ReplayStatus),
}

/// All unwinding steps on one connection, inside the caller's transaction
async fn unwind_in(conn: &mut SqliteConnection, replay_id: Uuid) -> rlstats_common::Result<Unwound> {
    let Some(replay) = replays::find_by_id(&mut *conn, replay_id).await? else {
        return Ok(Unwound::Missing);
    };
    if !replay.status.can_transition_to(ReplayStatus::Reprocessing) {
        return Ok(Unwound::NotTerminal(replay.status));
    }

    let mut team_ids: Vec<Uuid> = [replay.blue_team_id, replay.orange_team_id]
        .into_iter()
        .flatten()
        .collect();
    for owned in teams::list_teams_for_replay(&mut *conn, replay_id).await? {
        if !team_ids.contains(&owned.id) {
            team_ids.push(owned.id);
        }
    }

    let mut report = ReprocessReport {
        replay_id,
        previous_status: Some(replay.status),
        ..Default::default()
    };

    for team_id in &team_ids {
        let roster = players::list_players_for_team(&mut *conn, *team_id).await?;
        players::detach_team_players(&mut *conn, *team_id).await?;
        for player in roster {
            if players::delete_player(&mut *conn, player.id).await? {
                report.players_removed += 1;
            }
        }
    }

    replays::begin_reprocess(&mut *conn, replay_id).await?;

    for team_id in team_ids {
        let references = replays::count_team_references(&mut *conn, team_id, replay_id).await?;
        if references > 0 {
            warn!(%replay_id, %team_id, references, "Team still referenced by another replay, not deleted");
            report.teams_skipped.push(team_id);
            continue;
        }

        match teams::delete_team(&mut *conn, team_id).await {
            Ok(_) => report.teams_removed.push(team_id),
            Err(e) if e.is_foreign_key_violation() => {
                warn!(%replay_id, %team_id, "Team delete blocked by a reference, skipped");
                report.teams_skipped.push(team_id);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Unwound::Done(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_total_failure() {
        let mut summary = BatchSummary {
            total: 2,
            failed: 2,
            ..Default::default()
        };
        assert!(summary.is_total_failure());

        summary.succeeded = 1;
        summary.failed = 1;
        assert!(!summary.is_total_failure());

        let skipped_only = BatchSummary {
            total: 3,
            skipped: 3,
            ..Default::default()
        };
        assert!(!skipped_only.is_total_failure());
    }
}
