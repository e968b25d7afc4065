//! Team persistence

use chrono::Utc;
use rlstats_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid};
use crate::models::{TeamColor, TeamRecord};

const TEAM_COLUMNS: &str = r#"
    id, replay_id, color, name, possession_time, time_in_side, shots, shots_against, goals,
    goals_against, saves, assists, score, shooting_percentage, bpm, bcpm, avg_boost_amount,
    boost_collected, boost_stolen, total_distance, time_supersonic, time_powerslide,
    time_defensive_third, time_neutral_third, time_offensive_third, time_behind_ball,
    time_infront_ball, demos_inflicted, demos_taken, stats, updated_at
"#;

fn team_from_row(row: &SqliteRow) -> Result<TeamRecord> {
    let id: String = row.get("id");
    let replay_id: String = row.get("replay_id");
    let color: String = row.get("color");
    let updated_at: String = row.get("updated_at");

    Ok(TeamRecord {
        id: parse_uuid(&id)?,
        replay_id: parse_uuid(&replay_id)?,
        color: TeamColor::parse(&color)
            .ok_or_else(|| Error::Internal(format!("Invalid team color '{}'", color)))?,
        name: row.get("name"),
        possession_time: row.get("possession_time"),
        time_in_side: row.get("time_in_side"),
        shots: row.get("shots"),
        shots_against: row.get("shots_against"),
        goals: row.get("goals"),
        goals_against: row.get("goals_against"),
        saves: row.get("saves"),
        assists: row.get("assists"),
        score: row.get("score"),
        shooting_percentage: row.get("shooting_percentage"),
        bpm: row.get("bpm"),
        bcpm: row.get("bcpm"),
        avg_boost_amount: row.get("avg_boost_amount"),
        boost_collected: row.get("boost_collected"),
        boost_stolen: row.get("boost_stolen"),
        total_distance: row.get("total_distance"),
        time_supersonic: row.get("time_supersonic"),
        time_powerslide: row.get("time_powerslide"),
        time_defensive_third: row.get("time_defensive_third"),
        time_neutral_third: row.get("time_neutral_third"),
        time_offensive_third: row.get("time_offensive_third"),
        time_behind_ball: row.get("time_behind_ball"),
        time_infront_ball: row.get("time_infront_ball"),
        demos_inflicted: row.get("demos_inflicted"),
        demos_taken: row.get("demos_taken"),
        stats: parse_json(row.get("stats")),
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn find_team<'e, E>(executor: E, id: Uuid) -> Result<Option<TeamRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {} FROM teams WHERE id = ?", TEAM_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(team_from_row).transpose()
}

pub async fn find_team_for_replay<'e, E>(
    executor: E,
    replay_id: Uuid,
    color: TeamColor,
) -> Result<Option<TeamRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("SELECT {} FROM teams WHERE replay_id = ? AND color = ?", TEAM_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(replay_id.to_string())
        .bind(color.as_str())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(team_from_row).transpose()
}

/// Blue first
pub async fn list_teams_for_replay<'e, E>(executor: E, replay_id: Uuid) -> Result<Vec<TeamRecord>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "SELECT {} FROM teams WHERE replay_id = ? ORDER BY color ASC",
        TEAM_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(replay_id.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter().map(team_from_row).collect()
}

/// Insert a team, or update the existing team for the same (replay, color)
///
/// Returns the id of the stored row, which is the existing one on conflict.
pub async fn upsert_team_row(conn: &mut SqliteConnection, team: &TeamRecord) -> Result<Uuid> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO teams (
            id, replay_id, color, name, possession_time, time_in_side, shots, shots_against,
            goals, goals_against, saves, assists, score, shooting_percentage, bpm, bcpm,
            avg_boost_amount, boost_collected, boost_stolen, total_distance, time_supersonic,
            time_powerslide, time_defensive_third, time_neutral_third, time_offensive_third,
            time_behind_ball, time_infront_ball, demos_inflicted, demos_taken, stats,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(replay_id, color) DO UPDATE SET
            name = excluded.name,
            possession_time = excluded.possession_time,
            time_in_side = excluded.time_in_side,
            shots = excluded.shots,
            shots_against = excluded.shots_against,
            goals = excluded.goals,
            goals_against = excluded.goals_against,
            saves = excluded.saves,
            assists = excluded.assists,
            score = excluded.score,
            shooting_percentage = excluded.shooting_percentage,
            bpm = excluded.bpm,
            bcpm = excluded.bcpm,
            avg_boost_amount = excluded.avg_boost_amount,
            boost_collected = excluded.boost_collected,
            boost_stolen = excluded.boost_stolen,
            total_distance = excluded.total_distance,
            time_supersonic = excluded.time_supersonic,
            time_powerslide = excluded.time_powerslide,
            time_defensive_third = excluded.time_defensive_third,
            time_neutral_third = excluded.time_neutral_third,
            time_offensive_third = excluded.time_offensive_third,
            time_behind_ball = excluded.time_behind_ball,
            time_infront_ball = excluded.time_infront_ball,
            demos_inflicted = excluded.demos_inflicted,
            demos_taken = excluded.demos_taken,
            stats = excluded.stats,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(team.id.to_string())
    .bind(team.replay_id.to_string())
    .bind(team.color.as_str())
    .bind(&team.name)
    .bind(team.possession_time)
    .bind(team.time_in_side)
    .bind(team.shots)
    .bind(team.shots_against)
    .bind(team.goals)
    .bind(team.goals_against)
    .bind(team.saves)
    .bind(team.assists)
    .bind(team.score)
    .bind(team.shooting_percentage)
    .bind(team.bpm)
    .bind(team.bcpm)
    .bind(team.avg_boost_amount)
    .bind(team.boost_collected)
    .bind(team.boost_stolen)
    .bind(team.total_distance)
    .bind(team.time_supersonic)
    .bind(team.time_powerslide)
    .bind(team.time_defensive_third)
    .bind(team.time_neutral_third)
    .bind(team.time_offensive_third)
    .bind(team.time_behind_ball)
    .bind(team.time_infront_ball)
    .bind(team.demos_inflicted)
    .bind(team.demos_taken)
    .bind(team.stats.to_string())
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM teams WHERE replay_id = ? AND color = ?")
        .bind(team.replay_id.to_string())
        .bind(team.color.as_str())
        .fetch_one(&mut *conn)
        .await?;

    parse_uuid(&id)
}

/// Delete one team; false if it did not exist
///
/// Fails with a foreign key violation while a replay still references it.
pub async fn delete_team<'e, E>(executor: E, id: Uuid) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM teams WHERE id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_teams<'e, E>(executor: E) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams")
        .fetch_one(executor)
        .await?;

    Ok(count)
}
