//! Replay sync scheduler
//!
//! Drives replays from `processing`/`reprocessing` to `completed` or `failed`
//! by polling the external API. Runs periodically and on demand for a single
//! replay.
//!
//! Failure policy:
//! - rate limiting, limiter timeout or shutdown: no state change, retried next cycle
//! - external "failed": replay becomes `failed`, no reconciliation
//! - reconciliation problems: `completed` with diagnostics in lenient mode,
//!   `failed` in strict mode

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rlstats_common::events::{EventBus, SyncEvent};
use rlstats_common::{Error, ReplayStatus};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::reconciliation::{Reconciled, ReconciliationEngine};
use super::replay_client::{ClientError, ExternalReplayClient, RemoteStatus};
use crate::config::ReconciliationMode;
use crate::db::replays::{self, Completion};
use crate::models::{Replay, ReplayMetadata, ReplayPayload};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

/// Replays polled concurrently within one cycle; the rate limiter still
/// serialises the actual requests
const CYCLE_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Replay not found: {0}")]
    NotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] Error),

    #[error("External API error: {0}")]
    External(#[from] ClientError),
}

impl SyncError {
    /// Nothing changed and trying again later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::External(e) => e.is_transient(),
            SyncError::Store(e) => e.is_database_locked(),
            SyncError::NotFound(_) => false,
        }
    }
}

/// Result of one sync pass over one replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// External analysis not finished; state unchanged
    Pending,
    Completed,
    /// Completed best-effort; some derived data could not be stored
    CompletedWithDiagnostics { diagnostics: Vec<String> },
    Failed { reason: String },
    /// Transient external problem; state unchanged
    RetryLater { reason: String },
    /// Nothing to do: the replay is already terminal
    AlreadyTerminal { status: ReplayStatus },
    /// Another pass for the same replay is running
    InFlight,
}

impl SyncOutcome {
    /// Status the replay holds after this outcome, when it is known to have changed
    pub fn new_status(&self) -> Option<ReplayStatus> {
        match self {
            SyncOutcome::Completed | SyncOutcome::CompletedWithDiagnostics { .. } => {
                Some(ReplayStatus::Completed)
            }
            SyncOutcome::Failed { .. } => Some(ReplayStatus::Failed),
            _ => None,
        }
    }
}

/// Counts for one scan cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub checked: usize,
    pub completed: usize,
    pub completed_with_diagnostics: usize,
    pub failed: usize,
    pub pending: usize,
    pub rate_limited: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Set when the pending replays could not even be listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,
}

impl CycleSummary {
    fn record(&mut self, result: &Result<SyncOutcome, SyncError>) {
        self.checked += 1;
        match result {
            Ok(SyncOutcome::Completed) => self.completed += 1,
            Ok(SyncOutcome::CompletedWithDiagnostics { .. }) => {
                self.completed += 1;
                self.completed_with_diagnostics += 1;
            }
            Ok(SyncOutcome::Failed { .. }) => self.failed += 1,
            Ok(SyncOutcome::Pending) => self.pending += 1,
            Ok(SyncOutcome::RetryLater { .. }) => self.rate_limited += 1,
            Ok(SyncOutcome::AlreadyTerminal { .. }) | Ok(SyncOutcome::InFlight) => self.skipped += 1,
            Err(e) if e.is_transient() => self.rate_limited += 1,
            Err(_) => self.errored += 1,
        }
    }

    /// Every replay errored (or the scan itself did); partial failure is not total
    pub fn is_total_failure(&self) -> bool {
        self.scan_error.is_some() || (self.checked > 0 && self.errored == self.checked)
    }
}

/// Per-process claim on replay ids being synced
#[derive(Clone, Default)]
struct InFlight {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlight {
    fn try_claim(&self, id: Uuid) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.insert(id).then(|| InFlightGuard {
            ids: Arc::clone(&self.ids),
            id,
        })
    }
}

struct InFlightGuard {
    ids: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.id);
    }
}

pub struct ReplaySyncScheduler {
    db: SqlitePool,
    client: Arc<ExternalReplayClient>,
    engine: ReconciliationEngine,
    event_bus: EventBus,
    mode: ReconciliationMode,
    in_flight: InFlight,
}

impl ReplaySyncScheduler {
    pub fn new(
        db: SqlitePool,
        client: Arc<ExternalReplayClient>,
        event_bus: EventBus,
        mode: ReconciliationMode,
    ) -> Self {
        Self {
            engine: ReconciliationEngine::new(db.clone()),
            db,
            client,
            event_bus,
            mode,
            in_flight: InFlight::default(),
        }
    }

    /// Run the periodic scan until `cancel` fires
    ///
    /// Missed ticks are delayed rather than bursted, so a slow cycle never
    /// causes back-to-back scans.
    pub fn spawn(self: Arc<Self>, poll_interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = poll_interval.as_secs(), "Replay sync scheduler started");
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                self.run_cycle().await;
            }

            info!("Replay sync scheduler stopped");
        })
    }

    /// One pass over every replay still waiting on the external API
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let pending = match replays::list_by_status(&self.db, &ReplayStatus::PENDING).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to list pending replays");
                summary.scan_error = Some(e.to_string());
                return summary;
            }
        };

        if pending.is_empty() {
            tracing::debug!("No processing replays found");
        }

        let results: Vec<Result<SyncOutcome, SyncError>> = stream::iter(pending)
            .map(|replay| async move {
                let replay_id = replay.id;
                let result = self.sync_claimed(replay).await;
                if let Err(e) = &result {
                    if e.is_transient() {
                        warn!(%replay_id, error = %e, "Sync deferred");
                    } else {
                        error!(%replay_id, error = %e, "Sync failed");
                    }
                }
                result
            })
            .buffer_unordered(CYCLE_CONCURRENCY)
            .collect()
            .await;

        for result in &results {
            summary.record(result);
        }

        if summary.checked > 0 {
            info!(
                checked = summary.checked,
                completed = summary.completed,
                failed = summary.failed,
                pending = summary.pending,
                rate_limited = summary.rate_limited,
                errored = summary.errored,
                "Sync cycle finished"
            );
        }

        self.event_bus.emit_lossy(SyncEvent::SyncCycleCompleted {
            checked: summary.checked,
            completed: summary.completed,
            failed: summary.failed,
            rate_limited: summary.rate_limited,
            timestamp: Utc::now(),
        });

        summary
    }

    /// Sync a single replay now (manual status check)
    pub async fn sync_replay(&self, replay_id: Uuid) -> Result<SyncOutcome, SyncError> {
        let replay = replays::find_by_id(&self.db, replay_id)
            .await?
            .ok_or(SyncError::NotFound(replay_id))?;

        self.sync_claimed(replay).await
    }

    async fn sync_claimed(&self, replay: Replay) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = self.in_flight.try_claim(replay.id) else {
            return Ok(SyncOutcome::InFlight);
        };

        if replay.status.is_terminal() {
            return Ok(SyncOutcome::AlreadyTerminal {
                status: replay.status,
            });
        }

        self.sync_pending(&replay).await
    }

    async fn sync_pending(&self, replay: &Replay) -> Result<SyncOutcome, SyncError> {
        let Some(external_id) = replay.external_id.as_deref() else {
            let reason = "Replay was never accepted by the external API".to_string();
            return self.fail(replay, reason).await;
        };

        let status = match self.client.fetch_status(external_id).await {
            Ok(status) => status,
            Err(e) if e.is_transient() => {
                warn!(replay_id = %replay.id, external_id, error = %e, "Status check deferred");
                return Ok(SyncOutcome::RetryLater {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        match status {
            RemoteStatus::Pending => Ok(SyncOutcome::Pending),
            RemoteStatus::Failed { reason } => {
                info!(replay_id = %replay.id, external_id, %reason, "External processing failed");
                self.fail(replay, reason).await
            }
            RemoteStatus::Ok => self.complete(replay, external_id).await,
        }
    }

    async fn complete(&self, replay: &Replay, external_id: &str) -> Result<SyncOutcome, SyncError> {
        let mut metadata = replay.metadata.clone();
        let mut reconciled = Reconciled::default();

        match self.client.fetch_full_result(external_id).await {
            Ok(payload) => {
                metadata = ReplayMetadata::from_payload(&payload);
                reconciled = self.reconcile(replay, &payload).await;
            }
            Err(e) if e.is_transient() => {
                warn!(replay_id = %replay.id, external_id, error = %e, "Full result fetch deferred");
                return Ok(SyncOutcome::RetryLater {
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                error!(replay_id = %replay.id, external_id, error = %e, "Full result fetch failed");
                reconciled.diagnostics.push(format!("full result: {}", e));
            }
        }

        if !reconciled.is_clean() {
            error!(
                replay_id = %replay.id,
                external_id,
                diagnostics = ?reconciled.diagnostics,
                mode = ?self.mode,
                "Reconciliation incomplete"
            );
            if self.mode == ReconciliationMode::Strict {
                return self.fail(replay, reconciled.diagnostics.join("; ")).await;
            }
        }

        let diagnostics = (!reconciled.is_clean()).then(|| reconciled.diagnostics.join("; "));
        let completion = Completion {
            metadata: &metadata,
            blue_team_id: reconciled.blue_team_id,
            orange_team_id: reconciled.orange_team_id,
            uploader_id: reconciled.uploader_id,
            diagnostics: diagnostics.as_deref(),
            processed_at: Utc::now(),
        };

        let written = retry_on_lock("complete replay", DEFAULT_MAX_LOCK_WAIT, || {
            replays::complete_replay(&self.db, replay.id, &completion)
        })
        .await;
        if let Some(outcome) = self.lost_race(replay, written).await? {
            return Ok(outcome);
        }

        self.announce(replay, ReplayStatus::Completed);
        info!(replay_id = %replay.id, external_id, "Replay completed");

        Ok(if reconciled.is_clean() {
            SyncOutcome::Completed
        } else {
            SyncOutcome::CompletedWithDiagnostics {
                diagnostics: reconciled.diagnostics,
            }
        })
    }

    async fn reconcile(&self, replay: &Replay, payload: &ReplayPayload) -> Reconciled {
        match self.engine.reconcile(replay, payload).await {
            Ok(reconciled) => reconciled,
            Err(e) => Reconciled {
                diagnostics: vec![e.to_string()],
                ..Default::default()
            },
        }
    }

    async fn fail(&self, replay: &Replay, reason: String) -> Result<SyncOutcome, SyncError> {
        let processed_at = Utc::now();
        let written = retry_on_lock("fail replay", DEFAULT_MAX_LOCK_WAIT, || {
            replays::mark_failed(&self.db, replay.id, processed_at, Some(&reason))
        })
        .await;
        if let Some(outcome) = self.lost_race(replay, written).await? {
            return Ok(outcome);
        }

        self.announce(replay, ReplayStatus::Failed);
        Ok(SyncOutcome::Failed { reason })
    }

    /// A conditional write that matched nothing means another writer moved the
    /// replay first; report what it holds now instead of failing
    async fn lost_race(
        &self,
        replay: &Replay,
        written: rlstats_common::Result<()>,
    ) -> Result<Option<SyncOutcome>, SyncError> {
        match written {
            Ok(()) => Ok(None),
            Err(Error::Conflict(_)) => {
                let current = replays::find_by_id(&self.db, replay.id)
                    .await?
                    .ok_or(SyncError::NotFound(replay.id))?;
                warn!(replay_id = %replay.id, status = %current.status, "Replay changed state during sync");
                Ok(Some(SyncOutcome::AlreadyTerminal {
                    status: current.status,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn announce(&self, replay: &Replay, new_status: ReplayStatus) {
        self.event_bus.emit_lossy(SyncEvent::status_changed(
            replay.id,
            replay.external_id.clone(),
            replay.status,
            new_status,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_total_failure_only_when_everything_errored() {
        let mut summary = CycleSummary::default();
        assert!(!summary.is_total_failure());

        summary.record(&Err(SyncError::NotFound(Uuid::nil())));
        assert!(summary.is_total_failure());

        summary.record(&Ok(SyncOutcome::Pending));
        assert!(!summary.is_total_failure());
        assert_eq!(summary.checked, 2);
    }

    #[test]
    fn test_transient_errors_count_as_rate_limited() {
        let mut summary = CycleSummary::default();
        summary.record(&Err(SyncError::External(ClientError::RateLimited)));
        summary.record(&Ok(SyncOutcome::RetryLater {
            reason: "429".into(),
        }));
        assert_eq!(summary.rate_limited, 2);
        assert_eq!(summary.errored, 0);
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let in_flight = InFlight::default();
        let id = Uuid::new_v4();

        let guard = in_flight.try_claim(id);
        assert!(guard.is_some());
        assert!(in_flight.try_claim(id).is_none());

        drop(guard);
        assert!(in_flight.try_claim(id).is_some());
    }

    #[test]
    fn test_outcome_new_status() {
        assert_eq!(SyncOutcome::Completed.new_status(), Some(ReplayStatus::Completed));
        assert_eq!(
            SyncOutcome::Failed { reason: "x".into() }.new_status(),
            Some(ReplayStatus::Failed)
        );
        assert_eq!(SyncOutcome::Pending.new_status(), None);
    }
}
