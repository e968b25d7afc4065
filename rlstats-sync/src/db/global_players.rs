//! Cross-game player identities

use chrono::Utc;
use rlstats_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::GlobalPlayer;

fn global_player_from_row(row: &SqliteRow) -> Result<GlobalPlayer> {
    let id: String = row.get("id");
    let first_seen_at: String = row.get("first_seen_at");
    let updated_at: String = row.get("updated_at");

    Ok(GlobalPlayer {
        id: parse_uuid(&id)?,
        platform: row.get("platform"),
        platform_id: row.get("platform_id"),
        name: row.get("name"),
        first_seen_at: parse_timestamp(&first_seen_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn find_by_identity<'e, E>(
    executor: E,
    platform: &str,
    platform_id: &str,
) -> Result<Option<GlobalPlayer>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT id, platform, platform_id, name, first_seen_at, updated_at
        FROM global_players
        WHERE platform = ? AND platform_id = ?
        "#,
    )
    .bind(platform)
    .bind(platform_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(global_player_from_row).transpose()
}

/// Create the identity on first sighting; rename it when the display name changed
pub async fn upsert_global_player(
    conn: &mut SqliteConnection,
    platform: &str,
    platform_id: &str,
    name: &str,
) -> Result<GlobalPlayer> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO global_players (id, platform, platform_id, name, first_seen_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(platform, platform_id) DO UPDATE SET
            name = excluded.name,
            updated_at = excluded.updated_at
        WHERE global_players.name != excluded.name
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(platform)
    .bind(platform_id)
    .bind(name)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    find_by_identity(&mut *conn, platform, platform_id)
        .await?
        .ok_or_else(|| {
            rlstats_common::Error::Internal(format!(
                "Global player {}:{} missing after upsert",
                platform, platform_id
            ))
        })
}

pub async fn count_global_players<'e, E>(executor: E) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM global_players")
        .fetch_one(executor)
        .await?;

    Ok(count)
}
