//! Shared fixtures for rlstats-sync integration tests
//!
//! A temp-file SQLite database, a scripted stand-in for the external API and
//! builders for its replay documents.

#![allow(dead_code)]

use async_trait::async_trait;
use rlstats_common::events::EventBus;
use rlstats_sync::config::{RateLimitConfig, ReconciliationMode};
use rlstats_sync::services::{
    ApiResponse, ClientError, ExternalReplayClient, LocalFileStore, RateLimiter, ReplayTransport,
};
use rlstats_sync::AppState;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Temp-file database with every table created
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = rlstats_sync::db::init_database_pool(&dir.path().join("test.db"))
        .await
        .expect("Failed to create test database");
    (dir, pool)
}

/// Fast limiter settings so tests do not wait on real backoff
pub fn fast_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        per_second: 100,
        per_hour: 10_000,
        dispatch_spacing_ms: 0,
        retry_backoff_ms: 10,
        ..Default::default()
    }
}

/// Scripted external API
///
/// Each external id has a queue of answers; the last answer repeats once the
/// queue is down to one. Unknown ids answer 404 (not yet known, i.e. pending).
#[derive(Default)]
pub struct FakeTransport {
    uploads: Mutex<VecDeque<ApiResponse>>,
    replies: Mutex<HashMap<String, VecDeque<ApiResponse>>>,
    upload_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the answer for the next upload
    pub fn push_upload(&self, response: ApiResponse) {
        self.uploads.lock().unwrap().push_back(response);
    }

    /// Queue answers for `GET /replays/{external_id}`
    pub fn push_replies(&self, external_id: &str, responses: impl IntoIterator<Item = ApiResponse>) {
        self.replies
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_default()
            .extend(responses);
    }

    /// Replace whatever was queued for `external_id` with one repeating answer
    pub fn set_reply(&self, external_id: &str, response: ApiResponse) {
        self.replies
            .lock()
            .unwrap()
            .insert(external_id.to_string(), VecDeque::from([response]));
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplayTransport for FakeTransport {
    async fn upload(&self, _file: &[u8], _file_name: &str) -> Result<ApiResponse, ClientError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ApiResponse::new(500, "no upload scripted")))
    }

    async fn get_replay(&self, external_id: &str) -> Result<ApiResponse, ClientError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        let Some(queue) = replies.get_mut(external_id) else {
            return Ok(ApiResponse::new(404, "not found"));
        };
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(response.unwrap_or_else(|| ApiResponse::new(404, "not found")))
    }
}

/// Database, transport and fully wired application state
pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub transport: Arc<FakeTransport>,
    pub limiter: Arc<RateLimiter>,
    pub state: AppState,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_mode(ReconciliationMode::Lenient).await
    }

    pub async fn with_mode(mode: ReconciliationMode) -> Self {
        Self::with_config(mode, fast_rate_limit()).await
    }

    pub async fn with_config(mode: ReconciliationMode, rate_limit: RateLimitConfig) -> Self {
        let (dir, pool) = create_test_db().await;
        let event_bus = EventBus::new(100);
        let transport = FakeTransport::new();
        let limiter = RateLimiter::new(rate_limit);
        let client = Arc::new(ExternalReplayClient::new(
            Arc::clone(&transport) as Arc<dyn ReplayTransport>,
            Arc::clone(&limiter),
        ));
        let file_store = Arc::new(LocalFileStore::new(dir.path()));
        let state = AppState::new(pool.clone(), event_bus.clone(), client, file_store, mode);

        Self {
            dir,
            pool,
            event_bus,
            transport,
            limiter,
            state,
        }
    }
}

pub fn upload_accepted(external_id: &str) -> ApiResponse {
    ApiResponse::new(
        201,
        json!({ "id": external_id, "location": format!("https://ballchasing.com/replay/{}", external_id) })
            .to_string(),
    )
}

pub fn upload_duplicate(external_id: &str) -> ApiResponse {
    ApiResponse::new(
        409,
        json!({ "id": external_id, "location": format!("https://ballchasing.com/replay/{}", external_id) })
            .to_string(),
    )
}

pub fn status_only(external_id: &str, status: &str) -> ApiResponse {
    ApiResponse::new(200, json!({ "id": external_id, "status": status }).to_string())
}

pub fn rate_limited() -> ApiResponse {
    ApiResponse::new(429, "Too Many Requests")
}

pub fn player_json(name: &str, platform_id: &str, goals: i64) -> Value {
    json!({
        "name": name,
        "id": { "platform": "steam", "id": platform_id },
        "car_name": "Octane",
        "car_id": 23,
        "camera": { "fov": 110, "height": 100 },
        "stats": {
            "core": { "goals": goals, "shots": goals + 1, "saves": 1, "assists": 0, "score": 100 * goals },
            "boost": { "bpm": 350.0, "avg_amount": 45.2 },
            "movement": { "avg_speed": 1450.0, "total_distance": 180000.0 },
            "positioning": { "avg_distance_to_ball": 2500.0 },
            "demo": { "inflicted": 1, "taken": 0 }
        }
    })
}

pub fn team_json(goals: i64, players: &[(&str, &str)]) -> Value {
    let players: Vec<Value> = players
        .iter()
        .map(|(name, platform_id)| player_json(name, platform_id, 1))
        .collect();
    json!({
        "players": players,
        "stats": {
            "ball": { "possession_time": 120.5, "time_in_side": 150.0 },
            "core": { "goals": goals, "goals_against": 0, "shots": goals + 2, "saves": 3 },
            "boost": { "bpm": 1000.0, "amount_collected": 5000 },
            "movement": { "total_distance": 500000.0 },
            "positioning": { "time_defensive_third": 100.0 },
            "demo": { "inflicted": 2, "taken": 1 }
        }
    })
}

/// Complete "ok" document with three players per side
pub fn full_result(external_id: &str, blue_goals: i64, orange_goals: i64) -> Value {
    full_result_with(
        external_id,
        team_json(blue_goals, &[("Alpha", "1001"), ("Bravo", "1002"), ("Charlie", "1003")]),
        team_json(orange_goals, &[("Delta", "2001"), ("Echo", "2002"), ("Foxtrot", "2003")]),
    )
}

pub fn full_result_with(external_id: &str, blue: Value, orange: Value) -> Value {
    json!({
        "id": external_id,
        "status": "ok",
        "link": format!("https://ballchasing.com/api/replays/{}", external_id),
        "title": "Ranked Doubles",
        "map_code": "stadium_p",
        "map_name": "DFH Stadium",
        "team_size": 3,
        "duration": 300,
        "overtime": false,
        "date": "2024-03-01T20:15:00+01:00",
        "date_has_timezone": true,
        "uploader": {
            "steam_id": "76561198000000001",
            "name": "uploader",
            "profile_url": "https://steamcommunity.com/id/uploader",
            "avatar": "https://avatars/uploader.jpg"
        },
        "groups": [{ "id": "spring-cup-abc", "name": "Spring Cup" }],
        "blue": blue,
        "orange": orange
    })
}

pub fn ok_response(document: &Value) -> ApiResponse {
    ApiResponse::new(200, document.to_string())
}
