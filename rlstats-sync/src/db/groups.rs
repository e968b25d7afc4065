//! External replay groups and membership

use chrono::Utc;
use rlstats_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::ReplayGroup;

fn group_from_row(row: &SqliteRow) -> Result<ReplayGroup> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");

    Ok(ReplayGroup {
        id: parse_uuid(&id)?,
        external_id: row.get("external_id"),
        name: row.get("name"),
        link: row.get("link"),
        created_at: parse_timestamp(&created_at)?,
    })
}

pub async fn find_by_external_id<'e, E>(executor: E, external_id: &str) -> Result<Option<ReplayGroup>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        "SELECT id, external_id, name, link, created_at FROM replay_groups WHERE external_id = ?",
    )
    .bind(external_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(group_from_row).transpose()
}

/// Find-or-create; an existing group is returned unchanged
pub async fn find_or_create_group(
    conn: &mut SqliteConnection,
    external_id: &str,
    name: &str,
    link: Option<&str>,
) -> Result<ReplayGroup> {
    sqlx::query(
        r#"
        INSERT INTO replay_groups (id, external_id, name, link, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(external_id)
    .bind(name)
    .bind(link)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    find_by_external_id(&mut *conn, external_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Group {} missing after insert", external_id)))
}

/// Link a replay to a group; linking twice is a no-op
pub async fn add_member<'e, E>(executor: E, replay_id: Uuid, group_id: Uuid) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("INSERT OR IGNORE INTO replay_group_members (replay_id, group_id) VALUES (?, ?)")
        .bind(replay_id.to_string())
        .bind(group_id.to_string())
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn list_groups_for_replay<'e, E>(executor: E, replay_id: Uuid) -> Result<Vec<ReplayGroup>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT g.id, g.external_id, g.name, g.link, g.created_at
        FROM replay_groups g
        JOIN replay_group_members m ON m.group_id = g.id
        WHERE m.replay_id = ?
        ORDER BY g.name ASC
        "#,
    )
    .bind(replay_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter().map(group_from_row).collect()
}

pub async fn count_groups<'e, E>(executor: E) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replay_groups")
        .fetch_one(executor)
        .await?;

    Ok(count)
}
