//! Materialise an external result document into local entities
//!
//! Every upsert here is keyed by a stable identifier (replay + color for
//! teams, name within a team for players, platform identity for global
//! players, steam id for uploaders, external id for groups), so running a
//! pass twice over the same document leaves the same entity set behind.

use rlstats_common::Result as StoreResult;
use sqlx::SqlitePool;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{global_players, groups, players, teams, uploaders};
use crate::models::payload::{GroupPayload, PlayerPayload, UploaderPayload};
use crate::models::{
    GlobalPlayer, PlayerRecord, Replay, ReplayGroup, ReplayPayload, TeamColor, TeamPayload,
    TeamRecord, Uploader,
};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] rlstats_common::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// What one reconciliation pass produced
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub blue_team_id: Option<Uuid>,
    pub orange_team_id: Option<Uuid>,
    pub uploader_id: Option<Uuid>,
    pub group_ids: Vec<Uuid>,
    /// Parts that could not be stored; empty on a clean pass
    pub diagnostics: Vec<String>,
}

impl Reconciled {
    fn set_team_id(&mut self, color: TeamColor, id: Uuid) {
        match color {
            TeamColor::Blue => self.blue_team_id = Some(id),
            TeamColor::Orange => self.orange_team_id = Some(id),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

pub struct ReconciliationEngine {
    db: SqlitePool,
}

impl ReconciliationEngine {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Store teams, players, uploader and groups for `replay`
    ///
    /// Each entity is attempted independently; a failure is recorded in
    /// `diagnostics` and the rest of the document is still applied. Only a
    /// document that belongs to a different replay is rejected outright.
    pub async fn reconcile(
        &self,
        replay: &Replay,
        payload: &ReplayPayload,
    ) -> Result<Reconciled, ReconcileError> {
        if let (Some(expected), Some(actual)) = (replay.external_id.as_deref(), payload.id.as_deref()) {
            if expected != actual {
                return Err(ReconcileError::InvalidPayload(format!(
                    "document is for {} but replay {} expects {}",
                    actual, replay.id, expected
                )));
            }
        }

        let mut outcome = Reconciled::default();

        for color in TeamColor::BOTH {
            let existing = match color {
                TeamColor::Blue => replay.blue_team_id,
                TeamColor::Orange => replay.orange_team_id,
            };

            match payload.team(color) {
                Some(team) => match self.upsert_team(replay.id, color, team, existing).await {
                    Ok(team_id) => outcome.set_team_id(color, team_id),
                    Err(e) => {
                        warn!(replay_id = %replay.id, %color, error = %e, "Team upsert failed");
                        outcome.diagnostics.push(format!("{} team: {}", color, e));
                    }
                },
                None => outcome
                    .diagnostics
                    .push(format!("{} team missing from result", color)),
            }
        }

        if let Some(uploader) = &payload.uploader {
            match self.upsert_uploader(uploader).await {
                Ok(Some(stored)) => outcome.uploader_id = Some(stored.id),
                Ok(None) => debug!(replay_id = %replay.id, "Uploader without steam id, skipped"),
                Err(e) => {
                    warn!(replay_id = %replay.id, error = %e, "Uploader upsert failed");
                    outcome.diagnostics.push(format!("uploader: {}", e));
                }
            }
        }

        for group in &payload.groups {
            match self.upsert_group(group).await {
                Ok(Some(stored)) => match groups::add_member(&self.db, replay.id, stored.id).await {
                    Ok(()) => outcome.group_ids.push(stored.id),
                    Err(e) => outcome
                        .diagnostics
                        .push(format!("group {} membership: {}", stored.external_id, e)),
                },
                Ok(None) => debug!(replay_id = %replay.id, "Group without id, skipped"),
                Err(e) => {
                    warn!(replay_id = %replay.id, error = %e, "Group upsert failed");
                    outcome.diagnostics.push(format!("group: {}", e));
                }
            }
        }

        Ok(outcome)
    }

    /// Create or update one side of a replay, with its player-instances
    ///
    /// With `existing_team_id` resolving to a team, that team's statistics are
    /// updated in place and its players are matched by name: matches are
    /// updated, new names are created, nobody is deleted. Without one, the
    /// (replay, color) pair is checked before creating, so concurrent passes
    /// converge on a single team.
    pub async fn upsert_team(
        &self,
        replay_id: Uuid,
        color: TeamColor,
        payload: &TeamPayload,
        existing_team_id: Option<Uuid>,
    ) -> Result<Uuid, ReconcileError> {
        let team_id = retry_on_lock("upsert team", DEFAULT_MAX_LOCK_WAIT, || {
            self.upsert_team_once(replay_id, color, payload, existing_team_id)
        })
        .await?;

        debug!(%replay_id, %color, %team_id, players = payload.players.len(), "Team reconciled");
        Ok(team_id)
    }

    async fn upsert_team_once(
        &self,
        replay_id: Uuid,
        color: TeamColor,
        payload: &TeamPayload,
        existing_team_id: Option<Uuid>,
    ) -> StoreResult<Uuid> {
        let mut tx = self.db.begin().await?;

        let mut existing = match existing_team_id {
            Some(id) => teams::find_team(&mut *tx, id).await?,
            None => None,
        };
        if existing.is_none() {
            existing = teams::find_team_for_replay(&mut *tx, replay_id, color).await?;
        }

        let candidate_id = existing.as_ref().map(|t| t.id).unwrap_or_else(Uuid::new_v4);
        let record = TeamRecord::from_payload(candidate_id, replay_id, color, payload);
        let team_id = teams::upsert_team_row(&mut tx, &record).await?;

        let mut by_name: HashMap<String, Vec<PlayerRecord>> = HashMap::new();
        for player in players::list_players_for_team(&mut *tx, team_id).await? {
            by_name.entry(player.name.clone()).or_default().push(player);
        }
        // Oldest first when several share a name
        for same_name in by_name.values_mut() {
            same_name.reverse();
        }

        for incoming in &payload.players {
            let global_player_id = match incoming.platform_identity() {
                Some((platform, platform_id)) => {
                    let display_name = incoming.name.as_deref().unwrap_or(platform_id);
                    let global =
                        global_players::upsert_global_player(&mut tx, platform, platform_id, display_name)
                            .await?;
                    Some(global.id)
                }
                None => None,
            };

            let name = incoming.name.clone().unwrap_or_default();
            match by_name.get_mut(&name).and_then(Vec::pop) {
                Some(matched) => {
                    let record = PlayerRecord::from_payload(matched.id, team_id, global_player_id, incoming);
                    players::update_player_stats(&mut *tx, &record).await?;
                }
                None => {
                    let record = PlayerRecord::from_payload(Uuid::new_v4(), team_id, global_player_id, incoming);
                    players::insert_player(&mut *tx, &record).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(team_id)
    }

    /// Find-or-update by steam id; `None` when the payload has no steam id
    pub async fn upsert_uploader(&self, payload: &UploaderPayload) -> Result<Option<Uploader>, ReconcileError> {
        let Some(steam_id) = payload.steam_id.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let uploader = retry_on_lock("upsert uploader", DEFAULT_MAX_LOCK_WAIT, || async {
            let mut conn = self.db.acquire().await?;
            uploaders::upsert_uploader(
                &mut conn,
                steam_id,
                payload.name.as_deref(),
                payload.profile_url.as_deref(),
                payload.avatar.as_deref(),
            )
            .await
        })
        .await?;

        Ok(Some(uploader))
    }

    /// Find-or-create by external id; existing groups are never modified
    pub async fn upsert_group(&self, payload: &GroupPayload) -> Result<Option<ReplayGroup>, ReconcileError> {
        let Some(external_id) = payload.id.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let name = payload
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(external_id);

        let group = retry_on_lock("upsert group", DEFAULT_MAX_LOCK_WAIT, || async {
            let mut conn = self.db.acquire().await?;
            groups::find_or_create_group(&mut conn, external_id, name, payload.link.as_deref()).await
        })
        .await?;

        Ok(Some(group))
    }

    /// Cross-game identity for one player sighting; `None` without a platform identity
    pub async fn upsert_global_player(
        &self,
        payload: &PlayerPayload,
    ) -> Result<Option<GlobalPlayer>, ReconcileError> {
        let Some((platform, platform_id)) = payload.platform_identity() else {
            return Ok(None);
        };
        let name = payload.name.as_deref().unwrap_or(platform_id);

        let global = retry_on_lock("upsert global player", DEFAULT_MAX_LOCK_WAIT, || async {
            let mut conn = self.db.acquire().await?;
            global_players::upsert_global_player(&mut conn, platform, platform_id, name).await
        })
        .await?;

        Ok(Some(global))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database_pool, replays};
    use crate::models::payload::PlatformId;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool, Replay) {
        let dir = TempDir::new().unwrap();
        let pool = init_database_pool(&dir.path().join("test.db")).await.unwrap();
        let replay = Replay::new("match.replay", Some("abc".into()));
        replays::insert_replay(&pool, &replay).await.unwrap();
        (dir, pool, replay)
    }

    fn player(name: &str, platform_id: &str, goals: i64) -> PlayerPayload {
        let mut p = PlayerPayload {
            name: Some(name.to_string()),
            id: Some(PlatformId {
                platform: Some("steam".into()),
                id: Some(platform_id.to_string()),
            }),
            ..Default::default()
        };
        p.stats.core.goals = Some(goals);
        p
    }

    fn team(goals: i64, players: Vec<PlayerPayload>) -> TeamPayload {
        let mut t = TeamPayload {
            name: Some("Blue Squad".into()),
            players,
            ..Default::default()
        };
        t.stats.core.goals = Some(goals);
        t
    }

    #[tokio::test]
    async fn test_upsert_team_twice_is_idempotent() {
        let (_dir, pool, replay) = setup().await;
        let engine = ReconciliationEngine::new(pool.clone());

        let first = team(2, vec![player("Alpha", "1", 1), player("Bravo", "2", 1)]);
        let team_id = engine.upsert_team(replay.id, TeamColor::Blue, &first, None).await.unwrap();

        let second = team(3, vec![player("Alpha", "1", 2), player("Bravo", "2", 1)]);
        let again = engine
            .upsert_team(replay.id, TeamColor::Blue, &second, Some(team_id))
            .await
            .unwrap();

        assert_eq!(again, team_id);
        assert_eq!(teams::count_teams(&pool).await.unwrap(), 1);
        assert_eq!(players::count_players(&pool).await.unwrap(), 2);

        let stored = teams::find_team(&pool, team_id).await.unwrap().unwrap();
        assert_eq!(stored.goals, Some(3));

        let roster = players::list_players_for_team(&pool, team_id).await.unwrap();
        let alpha = roster.iter().find(|p| p.name == "Alpha").unwrap();
        assert_eq!(alpha.goals, Some(2));
    }

    #[tokio::test]
    async fn test_upsert_team_without_id_reuses_color_slot() {
        let (_dir, pool, replay) = setup().await;
        let engine = ReconciliationEngine::new(pool.clone());

        let payload = team(1, vec![player("Alpha", "1", 1)]);
        let a = engine.upsert_team(replay.id, TeamColor::Orange, &payload, None).await.unwrap();
        let b = engine.upsert_team(replay.id, TeamColor::Orange, &payload, None).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(teams::count_teams(&pool).await.unwrap(), 1);
        assert_eq!(players::count_players(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_path_adds_new_players_and_keeps_missing_ones() {
        let (_dir, pool, replay) = setup().await;
        let engine = ReconciliationEngine::new(pool.clone());

        let team_id = engine
            .upsert_team(replay.id, TeamColor::Blue, &team(1, vec![player("Alpha", "1", 1)]), None)
            .await
            .unwrap();
        engine
            .upsert_team(
                replay.id,
                TeamColor::Blue,
                &team(1, vec![player("Charlie", "3", 0)]),
                Some(team_id),
            )
            .await
            .unwrap();

        let names: Vec<String> = players::list_players_for_team(&pool, team_id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Alpha".to_string()));
        assert!(names.contains(&"Charlie".to_string()));
    }

    #[tokio::test]
    async fn test_global_player_renamed_not_duplicated() {
        let (_dir, pool, _replay) = setup().await;
        let engine = ReconciliationEngine::new(pool.clone());

        let first = engine.upsert_global_player(&player("Old", "42", 0)).await.unwrap().unwrap();
        let second = engine.upsert_global_player(&player("New", "42", 0)).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "New");
        assert_eq!(global_players::count_global_players(&pool).await.unwrap(), 1);

        let anonymous = PlayerPayload {
            name: Some("Guest".into()),
            ..Default::default()
        };
        assert!(engine.upsert_global_player(&anonymous).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uploader_keeps_fields_missing_from_later_sighting() {
        let (_dir, pool, _replay) = setup().await;
        let engine = ReconciliationEngine::new(pool.clone());

        let full = UploaderPayload {
            steam_id: Some("7656".into()),
            name: Some("Uploader".into()),
            profile_url: Some("https://steam/7656".into()),
            avatar: Some("https://img/7656".into()),
        };
        let first = engine.upsert_uploader(&full).await.unwrap().unwrap();

        let sparse = UploaderPayload {
            steam_id: Some("7656".into()),
            name: Some("Renamed".into()),
            profile_url: Some(String::new()),
            avatar: None,
        };
        let second = engine.upsert_uploader(&sparse).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("Renamed"));
        assert_eq!(second.profile_url.as_deref(), Some("https://steam/7656"));
        assert_eq!(second.avatar.as_deref(), Some("https://img/7656"));
        assert_eq!(uploaders::count_uploaders(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_group_is_immutable_once_seen() {
        let (_dir, pool, _replay) = setup().await;
        let engine = ReconciliationEngine::new(pool.clone());

        let first = engine
            .upsert_group(&GroupPayload {
                id: Some("rlcs-2024".into()),
                name: None,
                link: None,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.name, "rlcs-2024");

        let second = engine
            .upsert_group(&GroupPayload {
                id: Some("rlcs-2024".into()),
                name: Some("RLCS 2024".into()),
                link: Some("https://x/group/rlcs-2024".into()),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.name, "rlcs-2024");
        assert_eq!(groups::count_groups(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_records_missing_team_as_diagnostic() {
        let (_dir, pool, replay) = setup().await;
        let engine = ReconciliationEngine::new(pool.clone());

        let payload = ReplayPayload {
            id: Some("abc".into()),
            blue: Some(team(3, vec![player("Alpha", "1", 3)])),
            groups: vec![GroupPayload {
                id: Some("g1".into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let outcome = engine.reconcile(&replay, &payload).await.unwrap();
        assert!(outcome.blue_team_id.is_some());
        assert!(outcome.orange_team_id.is_none());
        assert_eq!(outcome.group_ids.len(), 1);
        assert_eq!(outcome.diagnostics, vec!["orange team missing from result".to_string()]);

        let second = engine.reconcile(&replay, &payload).await.unwrap();
        assert_eq!(second.group_ids, outcome.group_ids);
        assert_eq!(groups::list_groups_for_replay(&pool, replay.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_rejects_foreign_document() {
        let (_dir, pool, replay) = setup().await;
        let engine = ReconciliationEngine::new(pool);

        let payload = ReplayPayload {
            id: Some("other".into()),
            ..Default::default()
        };
        let result = engine.reconcile(&replay, &payload).await;
        assert!(matches!(result, Err(ReconcileError::InvalidPayload(_))));
    }
}
