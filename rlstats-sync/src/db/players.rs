//! Player-instance persistence

use chrono::Utc;
use rlstats_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor};
use uuid::Uuid;

use super::{parse_json, parse_optional_uuid, parse_timestamp, parse_uuid};
use crate::models::PlayerRecord;

const PLAYER_COLUMNS: &str = r#"
    p.id, p.team_id, p.global_player_id, p.name, p.platform, p.platform_id, p.car_id,
    p.car_name, p.mvp, p.steering_sensitivity, p.start_time, p.end_time, p.camera, p.shots,
    p.goals, p.saves, p.assists, p.score, p.shooting_percentage, p.bpm, p.avg_boost_amount,
    p.avg_speed, p.total_distance, p.time_supersonic, p.avg_distance_to_ball,
    p.demos_inflicted, p.demos_taken, p.stats, p.updated_at
"#;

fn player_from_row(row: &SqliteRow) -> Result<PlayerRecord> {
    let id: String = row.get("id");
    let updated_at: String = row.get("updated_at");
    let camera: Option<String> = row.get("camera");

    Ok(PlayerRecord {
        id: parse_uuid(&id)?,
        team_id: parse_optional_uuid(row.get("team_id"))?,
        global_player_id: parse_optional_uuid(row.get("global_player_id"))?,
        name: row.get("name"),
        platform: row.get("platform"),
        platform_id: row.get("platform_id"),
        car_id: row.get("car_id"),
        car_name: row.get("car_name"),
        mvp: row.get("mvp"),
        steering_sensitivity: row.get("steering_sensitivity"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        camera: camera.map(|raw| parse_json(Some(raw))),
        shots: row.get("shots"),
        goals: row.get("goals"),
        saves: row.get("saves"),
        assists: row.get("assists"),
        score: row.get("score"),
        shooting_percentage: row.get("shooting_percentage"),
        bpm: row.get("bpm"),
        avg_boost_amount: row.get("avg_boost_amount"),
        avg_speed: row.get("avg_speed"),
        total_distance: row.get("total_distance"),
        time_supersonic: row.get("time_supersonic"),
        avg_distance_to_ball: row.get("avg_distance_to_ball"),
        demos_inflicted: row.get("demos_inflicted"),
        demos_taken: row.get("demos_taken"),
        stats: parse_json(row.get("stats")),
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn insert_player<'e, E>(executor: E, player: &PlayerRecord) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO players (
            id, team_id, global_player_id, name, platform, platform_id, car_id, car_name, mvp,
            steering_sensitivity, start_time, end_time, camera, shots, goals, saves, assists,
            score, shooting_percentage, bpm, avg_boost_amount, avg_speed, total_distance,
            time_supersonic, avg_distance_to_ball, demos_inflicted, demos_taken, stats,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(player.id.to_string())
    .bind(player.team_id.map(|id| id.to_string()))
    .bind(player.global_player_id.map(|id| id.to_string()))
    .bind(&player.name)
    .bind(&player.platform)
    .bind(&player.platform_id)
    .bind(player.car_id)
    .bind(&player.car_name)
    .bind(player.mvp)
    .bind(player.steering_sensitivity)
    .bind(player.start_time)
    .bind(player.end_time)
    .bind(player.camera.as_ref().map(|c| c.to_string()))
    .bind(player.shots)
    .bind(player.goals)
    .bind(player.saves)
    .bind(player.assists)
    .bind(player.score)
    .bind(player.shooting_percentage)
    .bind(player.bpm)
    .bind(player.avg_boost_amount)
    .bind(player.avg_speed)
    .bind(player.total_distance)
    .bind(player.time_supersonic)
    .bind(player.avg_distance_to_ball)
    .bind(player.demos_inflicted)
    .bind(player.demos_taken)
    .bind(player.stats.to_string())
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Overwrite the statistics of an existing player-instance, keeping its id and team
pub async fn update_player_stats<'e, E>(executor: E, player: &PlayerRecord) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE players SET
            global_player_id = ?, platform = ?, platform_id = ?, car_id = ?, car_name = ?,
            mvp = ?, steering_sensitivity = ?, start_time = ?, end_time = ?, camera = ?,
            shots = ?, goals = ?, saves = ?, assists = ?, score = ?, shooting_percentage = ?,
            bpm = ?, avg_boost_amount = ?, avg_speed = ?, total_distance = ?,
            time_supersonic = ?, avg_distance_to_ball = ?, demos_inflicted = ?, demos_taken = ?,
            stats = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(player.global_player_id.map(|id| id.to_string()))
    .bind(&player.platform)
    .bind(&player.platform_id)
    .bind(player.car_id)
    .bind(&player.car_name)
    .bind(player.mvp)
    .bind(player.steering_sensitivity)
    .bind(player.start_time)
    .bind(player.end_time)
    .bind(player.camera.as_ref().map(|c| c.to_string()))
    .bind(player.shots)
    .bind(player.goals)
    .bind(player.saves)
    .bind(player.assists)
    .bind(player.score)
    .bind(player.shooting_percentage)
    .bind(player.bpm)
    .bind(player.avg_boost_amount)
    .bind(player.avg_speed)
    .bind(player.total_distance)
    .bind(player.time_supersonic)
    .bind(player.avg_distance_to_ball)
    .bind(player.demos_inflicted)
    .bind(player.demos_taken)
    .bind(player.stats.to_string())
    .bind(Utc::now().to_rfc3339())
    .bind(player.id.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list_players_for_team<'e, E>(executor: E, team_id: Uuid) -> Result<Vec<PlayerRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM players p WHERE p.team_id = ? ORDER BY p.created_at ASC, p.name ASC",
        PLAYER_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(team_id.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter().map(player_from_row).collect()
}

/// Disconnect every player-instance from `team_id`; returns how many were detached
pub async fn detach_team_players<'e, E>(executor: E, team_id: Uuid) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("UPDATE players SET team_id = NULL WHERE team_id = ?")
        .bind(team_id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_player<'e, E>(executor: E, id: Uuid) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM players WHERE id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete every player-instance without a team, system-wide
pub async fn delete_orphan_players<'e, E>(executor: E) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM players WHERE team_id IS NULL")
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

pub async fn count_players<'e, E>(executor: E) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM players")
        .fetch_one(executor)
        .await?;

    Ok(count)
}
