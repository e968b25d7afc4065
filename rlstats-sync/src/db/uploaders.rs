//! Uploader persistence

use chrono::Utc;
use rlstats_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqliteExecutor};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::Uploader;

fn uploader_from_row(row: &SqliteRow) -> Result<Uploader> {
    let id: String = row.get("id");
    let updated_at: String = row.get("updated_at");

    Ok(Uploader {
        id: parse_uuid(&id)?,
        steam_id: row.get("steam_id"),
        name: row.get("name"),
        profile_url: row.get("profile_url"),
        avatar: row.get("avatar"),
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub async fn find_by_steam_id<'e, E>(executor: E, steam_id: &str) -> Result<Option<Uploader>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        "SELECT id, steam_id, name, profile_url, avatar, updated_at FROM uploaders WHERE steam_id = ?",
    )
    .bind(steam_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(uploader_from_row).transpose()
}

pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Uploader>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        "SELECT id, steam_id, name, profile_url, avatar, updated_at FROM uploaders WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(uploader_from_row).transpose()
}

/// Find-or-update keyed by steam id
///
/// Display fields are only overwritten by non-empty incoming values.
pub async fn upsert_uploader(
    conn: &mut SqliteConnection,
    steam_id: &str,
    name: Option<&str>,
    profile_url: Option<&str>,
    avatar: Option<&str>,
) -> Result<Uploader> {
    let non_empty = |value: Option<&str>| value.filter(|v| !v.trim().is_empty()).map(str::to_string);
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO uploaders (id, steam_id, name, profile_url, avatar, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(steam_id) DO UPDATE SET
            name = COALESCE(excluded.name, uploaders.name),
            profile_url = COALESCE(excluded.profile_url, uploaders.profile_url),
            avatar = COALESCE(excluded.avatar, uploaders.avatar),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(steam_id)
    .bind(non_empty(name))
    .bind(non_empty(profile_url))
    .bind(non_empty(avatar))
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    find_by_steam_id(&mut *conn, steam_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Uploader {} missing after upsert", steam_id)))
}

pub async fn count_uploaders<'e, E>(executor: E) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uploaders")
        .fetch_one(executor)
        .await?;

    Ok(count)
}
