//! SQLite store for replays and their derived entities
//!
//! Single-statement helpers are generic over `SqliteExecutor`, so callers can
//! pass the pool, a connection, or an open transaction. Helpers that issue
//! several statements take `&mut SqliteConnection`.

pub mod global_players;
pub mod groups;
pub mod players;
pub mod replays;
pub mod teams;
pub mod uploaders;

use chrono::{DateTime, Utc};
use rlstats_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Open (creating if needed) the database and make sure every table exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS uploaders (
            id TEXT PRIMARY KEY,
            steam_id TEXT NOT NULL UNIQUE,
            name TEXT,
            profile_url TEXT,
            avatar TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS replays (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            file_name TEXT NOT NULL,
            file_hash TEXT,
            storage_path TEXT,
            status TEXT NOT NULL
                CHECK (status IN ('processing', 'completed', 'failed', 'reprocessing')),
            uploaded_at TEXT NOT NULL,
            processed_at TEXT,
            title TEXT,
            rocket_league_id TEXT,
            match_guid TEXT,
            map_code TEXT,
            map_name TEXT,
            match_type TEXT,
            team_size INTEGER,
            playlist_id TEXT,
            playlist_name TEXT,
            duration INTEGER,
            overtime INTEGER,
            overtime_seconds INTEGER,
            season INTEGER,
            season_type TEXT,
            played_at TEXT,
            played_at_has_timezone INTEGER,
            visibility TEXT,
            link TEXT,
            external_created TEXT,
            blue_team_id TEXT REFERENCES teams(id),
            orange_team_id TEXT REFERENCES teams(id),
            uploader_id TEXT REFERENCES uploaders(id) ON DELETE SET NULL,
            sync_diagnostics TEXT
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_replays_status ON replays(status)",
        "CREATE INDEX IF NOT EXISTS idx_replays_file_hash ON replays(file_hash)",
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            replay_id TEXT NOT NULL REFERENCES replays(id) ON DELETE CASCADE,
            color TEXT NOT NULL CHECK (color IN ('blue', 'orange')),
            name TEXT,
            possession_time REAL,
            time_in_side REAL,
            shots INTEGER,
            shots_against INTEGER,
            goals INTEGER,
            goals_against INTEGER,
            saves INTEGER,
            assists INTEGER,
            score INTEGER,
            shooting_percentage REAL,
            bpm REAL,
            bcpm REAL,
            avg_boost_amount REAL,
            boost_collected REAL,
            boost_stolen REAL,
            total_distance REAL,
            time_supersonic REAL,
            time_powerslide REAL,
            time_defensive_third REAL,
            time_neutral_third REAL,
            time_offensive_third REAL,
            time_behind_ball REAL,
            time_infront_ball REAL,
            demos_inflicted INTEGER,
            demos_taken INTEGER,
            stats TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (replay_id, color)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS global_players (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL,
            platform_id TEXT NOT NULL,
            name TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (platform, platform_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS players (
            id TEXT PRIMARY KEY,
            team_id TEXT REFERENCES teams(id) ON DELETE SET NULL,
            global_player_id TEXT REFERENCES global_players(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            platform TEXT,
            platform_id TEXT,
            car_id INTEGER,
            car_name TEXT,
            mvp INTEGER NOT NULL DEFAULT 0,
            steering_sensitivity REAL,
            start_time REAL,
            end_time REAL,
            camera TEXT,
            shots INTEGER,
            goals INTEGER,
            saves INTEGER,
            assists INTEGER,
            score INTEGER,
            shooting_percentage REAL,
            bpm REAL,
            avg_boost_amount REAL,
            avg_speed REAL,
            total_distance REAL,
            time_supersonic REAL,
            avg_distance_to_ball REAL,
            demos_inflicted INTEGER,
            demos_taken INTEGER,
            stats TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_players_team ON players(team_id)",
        "CREATE INDEX IF NOT EXISTS idx_players_global ON players(global_player_id)",
        r#"
        CREATE TABLE IF NOT EXISTS replay_groups (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            link TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS replay_group_members (
            replay_id TEXT NOT NULL REFERENCES replays(id) ON DELETE CASCADE,
            group_id TEXT NOT NULL REFERENCES replay_groups(id) ON DELETE CASCADE,
            PRIMARY KEY (replay_id, group_id)
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(
        "Database tables initialized (replays, teams, players, global_players, uploaders, replay_groups)"
    );

    Ok(())
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}

pub(crate) fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_json(value: Option<String>) -> serde_json::Value {
    value
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(serde_json::Value::Null)
}

/// Comma-separated `?` placeholders for an `IN (...)` clause
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let pool = init_database_pool(&path).await.unwrap();
        init_tables(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
             ('replays', 'teams', 'players', 'global_players', 'uploaders', 'replay_groups', 'replay_group_members')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
