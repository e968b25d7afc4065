//! Replay persistence
//!
//! Status changes are conditional updates: the `WHERE status IN (...)` guard
//! makes each transition atomic, so two writers racing on the same replay
//! cannot both apply a transition. A guard that matches no row surfaces as
//! `Error::Conflict`.

use chrono::{DateTime, Utc};
use rlstats_common::{Error, ReplayStatus, Result};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteExecutor};
use std::str::FromStr;
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_optional_uuid, parse_timestamp, parse_uuid, placeholders};
use crate::models::{Replay, ReplayMetadata};

const REPLAY_COLUMNS: &str = r#"
    id, external_id, file_name, file_hash, storage_path, status, uploaded_at, processed_at,
    title, rocket_league_id, match_guid, map_code, map_name, match_type, team_size,
    playlist_id, playlist_name, duration, overtime, overtime_seconds, season, season_type,
    played_at, played_at_has_timezone, visibility, link, external_created,
    blue_team_id, orange_team_id, uploader_id, sync_diagnostics
"#;

fn replay_from_row(row: &SqliteRow) -> Result<Replay> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let uploaded_at: String = row.get("uploaded_at");

    Ok(Replay {
        id: parse_uuid(&id)?,
        external_id: row.get("external_id"),
        file_name: row.get("file_name"),
        file_hash: row.get("file_hash"),
        storage_path: row.get("storage_path"),
        status: ReplayStatus::from_str(&status)?,
        uploaded_at: parse_timestamp(&uploaded_at)?,
        processed_at: parse_optional_timestamp(row.get("processed_at"))?,
        metadata: ReplayMetadata {
            title: row.get("title"),
            rocket_league_id: row.get("rocket_league_id"),
            match_guid: row.get("match_guid"),
            map_code: row.get("map_code"),
            map_name: row.get("map_name"),
            match_type: row.get("match_type"),
            team_size: row.get("team_size"),
            playlist_id: row.get("playlist_id"),
            playlist_name: row.get("playlist_name"),
            duration: row.get("duration"),
            overtime: row.get("overtime"),
            overtime_seconds: row.get("overtime_seconds"),
            season: row.get("season"),
            season_type: row.get("season_type"),
            played_at: row.get("played_at"),
            played_at_has_timezone: row.get("played_at_has_timezone"),
            visibility: row.get("visibility"),
            link: row.get("link"),
            external_created: row.get("external_created"),
        },
        blue_team_id: parse_optional_uuid(row.get("blue_team_id"))?,
        orange_team_id: parse_optional_uuid(row.get("orange_team_id"))?,
        uploader_id: parse_optional_uuid(row.get("uploader_id"))?,
        sync_diagnostics: row.get("sync_diagnostics"),
    })
}

/// Insert a freshly uploaded replay
///
/// A second insert with the same external id fails on the unique key.
pub async fn insert_replay<'e, E>(executor: E, replay: &Replay) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO replays (id, external_id, file_name, file_hash, storage_path, status, uploaded_at, processed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(replay.id.to_string())
    .bind(&replay.external_id)
    .bind(&replay.file_name)
    .bind(&replay.file_hash)
    .bind(&replay.storage_path)
    .bind(replay.status.as_str())
    .bind(replay.uploaded_at.to_rfc3339())
    .bind(replay.processed_at.map(|t| t.to_rfc3339()))
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Replay>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {} FROM replays WHERE id = ?", REPLAY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(replay_from_row).transpose()
}

pub async fn find_by_external_id<'e, E>(executor: E, external_id: &str) -> Result<Option<Replay>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {} FROM replays WHERE external_id = ?", REPLAY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(external_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(replay_from_row).transpose()
}

/// Replay with this content hash that already has an external id
pub async fn find_by_hash<'e, E>(executor: E, file_hash: &str) -> Result<Option<Replay>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM replays WHERE file_hash = ? AND external_id IS NOT NULL ORDER BY uploaded_at LIMIT 1",
        REPLAY_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(file_hash)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(replay_from_row).transpose()
}

/// Newest first
pub async fn list_replays<'e, E>(executor: E, limit: i64, offset: i64) -> Result<Vec<Replay>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM replays ORDER BY uploaded_at DESC LIMIT ? OFFSET ?",
        REPLAY_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

    rows.iter().map(replay_from_row).collect()
}

/// Replays in any of `statuses`, oldest upload first
pub async fn list_by_status<'e, E>(executor: E, statuses: &[ReplayStatus]) -> Result<Vec<Replay>>
where
    E: SqliteExecutor<'e>,
{
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM replays WHERE status IN ({}) ORDER BY uploaded_at ASC",
        REPLAY_COLUMNS,
        placeholders(statuses.len())
    );
    let mut query = sqlx::query(&sql);
    for status in statuses {
        query = query.bind(status.as_str());
    }

    let rows = query.fetch_all(executor).await?;
    rows.iter().map(replay_from_row).collect()
}

pub async fn list_all_ids<'e, E>(executor: E) -> Result<Vec<Uuid>>
where
    E: SqliteExecutor<'e>,
{
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM replays ORDER BY uploaded_at ASC")
        .fetch_all(executor)
        .await?;

    ids.iter().map(|id| parse_uuid(id)).collect()
}

pub async fn count_by_status<'e, E>(executor: E, status: ReplayStatus) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replays WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(executor)
        .await?;

    Ok(count)
}

pub async fn set_storage_path<'e, E>(executor: E, id: Uuid, storage_path: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("UPDATE replays SET storage_path = ? WHERE id = ?")
        .bind(storage_path)
        .bind(id.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

/// Everything written when a replay reaches `completed`
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub metadata: &'a ReplayMetadata,
    pub blue_team_id: Option<Uuid>,
    pub orange_team_id: Option<Uuid>,
    pub uploader_id: Option<Uuid>,
    pub diagnostics: Option<&'a str>,
    pub processed_at: DateTime<Utc>,
}

/// Move a pending replay to `completed`
pub async fn complete_replay<'e, E>(executor: E, id: Uuid, completion: &Completion<'_>) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let metadata = completion.metadata;
    let (guard, sources) = transition_guard(ReplayStatus::Completed);
    let sql = format!(
        r#"
        UPDATE replays SET
            status = 'completed',
            processed_at = ?,
            title = ?, rocket_league_id = ?, match_guid = ?, map_code = ?, map_name = ?,
            match_type = ?, team_size = ?, playlist_id = ?, playlist_name = ?, duration = ?,
            overtime = ?, overtime_seconds = ?, season = ?, season_type = ?, played_at = ?,
            played_at_has_timezone = ?, visibility = ?, link = ?, external_created = ?,
            blue_team_id = ?, orange_team_id = ?, uploader_id = ?, sync_diagnostics = ?
        WHERE id = ? AND {}
        "#,
        guard
    );
    let query = sqlx::query(&sql)
        .bind(completion.processed_at.to_rfc3339())
        .bind(&metadata.title)
        .bind(&metadata.rocket_league_id)
        .bind(&metadata.match_guid)
        .bind(&metadata.map_code)
        .bind(&metadata.map_name)
        .bind(&metadata.match_type)
        .bind(metadata.team_size)
        .bind(&metadata.playlist_id)
        .bind(&metadata.playlist_name)
        .bind(metadata.duration)
        .bind(metadata.overtime)
        .bind(metadata.overtime_seconds)
        .bind(metadata.season)
        .bind(&metadata.season_type)
        .bind(&metadata.played_at)
        .bind(metadata.played_at_has_timezone)
        .bind(&metadata.visibility)
        .bind(&metadata.link)
        .bind(&metadata.external_created)
        .bind(completion.blue_team_id.map(|id| id.to_string()))
        .bind(completion.orange_team_id.map(|id| id.to_string()))
        .bind(completion.uploader_id.map(|id| id.to_string()))
        .bind(completion.diagnostics)
        .bind(id.to_string());
    let result = bind_sources(query, &sources).execute(executor).await?;

    require_transition(result.rows_affected(), id, ReplayStatus::Completed)
}

/// Move a pending replay to `failed`
pub async fn mark_failed<'e, E>(
    executor: E,
    id: Uuid,
    processed_at: DateTime<Utc>,
    diagnostics: Option<&str>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let (guard, sources) = transition_guard(ReplayStatus::Failed);
    let sql = format!(
        "UPDATE replays SET status = 'failed', processed_at = ?, sync_diagnostics = ? WHERE id = ? AND {}",
        guard
    );
    let query = sqlx::query(&sql)
        .bind(processed_at.to_rfc3339())
        .bind(diagnostics)
        .bind(id.to_string());
    let result = bind_sources(query, &sources).execute(executor).await?;

    require_transition(result.rows_affected(), id, ReplayStatus::Failed)
}

/// Reset a terminal replay to `reprocessing`, clearing team links and `processed_at`
pub async fn begin_reprocess<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let (guard, sources) = transition_guard(ReplayStatus::Reprocessing);
    let sql = format!(
        r#"
        UPDATE replays SET
            status = 'reprocessing',
            processed_at = NULL,
            blue_team_id = NULL,
            orange_team_id = NULL,
            sync_diagnostics = NULL
        WHERE id = ? AND {}
        "#,
        guard
    );
    let query = sqlx::query(&sql).bind(id.to_string());
    let result = bind_sources(query, &sources).execute(executor).await?;

    require_transition(result.rows_affected(), id, ReplayStatus::Reprocessing)
}

/// Replays other than `replay_id` pointing at `team_id` as blue or orange
pub async fn count_team_references<'e, E>(executor: E, team_id: Uuid, replay_id: Uuid) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let team = team_id.to_string();
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM replays WHERE (blue_team_id = ? OR orange_team_id = ?) AND id != ?",
    )
    .bind(&team)
    .bind(&team)
    .bind(replay_id.to_string())
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// `status IN (...)` over every state allowed to move to `target`
fn transition_guard(target: ReplayStatus) -> (String, Vec<ReplayStatus>) {
    let sources: Vec<ReplayStatus> = ReplayStatus::ALL
        .into_iter()
        .filter(|from| from.can_transition_to(target))
        .collect();
    (format!("status IN ({})", placeholders(sources.len())), sources)
}

fn bind_sources<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    sources: &[ReplayStatus],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for status in sources {
        query = query.bind(status.as_str());
    }
    query
}

fn require_transition(rows_affected: u64, id: Uuid, target: ReplayStatus) -> Result<()> {
    if rows_affected == 0 {
        return Err(Error::Conflict(format!(
            "Replay {} is not in a state that can move to {}",
            id, target
        )));
    }
    Ok(())
}
