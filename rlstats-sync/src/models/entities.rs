//! Entities derived from a replay's full result

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::payload::{PlayerPayload, TeamColor, TeamPayload};

/// One side's aggregate statistics for one replay
#[derive(Debug, Clone, Serialize)]
pub struct TeamRecord {
    pub id: Uuid,
    pub replay_id: Uuid,
    pub color: TeamColor,
    pub name: Option<String>,
    pub possession_time: Option<f64>,
    pub time_in_side: Option<f64>,
    pub shots: Option<i64>,
    pub shots_against: Option<i64>,
    pub goals: Option<i64>,
    pub goals_against: Option<i64>,
    pub saves: Option<i64>,
    pub assists: Option<i64>,
    pub score: Option<i64>,
    pub shooting_percentage: Option<f64>,
    pub bpm: Option<f64>,
    pub bcpm: Option<f64>,
    pub avg_boost_amount: Option<f64>,
    pub boost_collected: Option<f64>,
    pub boost_stolen: Option<f64>,
    pub total_distance: Option<f64>,
    pub time_supersonic: Option<f64>,
    pub time_powerslide: Option<f64>,
    pub time_defensive_third: Option<f64>,
    pub time_neutral_third: Option<f64>,
    pub time_offensive_third: Option<f64>,
    pub time_behind_ball: Option<f64>,
    pub time_infront_ball: Option<f64>,
    pub demos_inflicted: Option<i64>,
    pub demos_taken: Option<i64>,
    /// Complete stats object as received
    pub stats: Value,
    pub updated_at: DateTime<Utc>,
}

impl TeamRecord {
    /// Build the stored form of one side of a result document
    pub fn from_payload(id: Uuid, replay_id: Uuid, color: TeamColor, payload: &TeamPayload) -> Self {
        let stats = &payload.stats;
        Self {
            id,
            replay_id,
            color,
            name: Some(payload.name.clone().unwrap_or_else(|| color.to_string())),
            possession_time: stats.ball.possession_time,
            time_in_side: stats.ball.time_in_side,
            shots: stats.core.shots,
            shots_against: stats.core.shots_against,
            goals: stats.core.goals,
            goals_against: stats.core.goals_against,
            saves: stats.core.saves,
            assists: stats.core.assists,
            score: stats.core.score,
            shooting_percentage: stats.core.shooting_percentage,
            bpm: stats.boost.bpm,
            bcpm: stats.boost.bcpm,
            avg_boost_amount: stats.boost.avg_amount,
            boost_collected: stats.boost.amount_collected,
            boost_stolen: stats.boost.amount_stolen,
            total_distance: stats.movement.total_distance,
            time_supersonic: stats.movement.time_supersonic_speed,
            time_powerslide: stats.movement.time_powerslide,
            time_defensive_third: stats.positioning.time_defensive_third,
            time_neutral_third: stats.positioning.time_neutral_third,
            time_offensive_third: stats.positioning.time_offensive_third,
            time_behind_ball: stats.positioning.time_behind_ball,
            time_infront_ball: stats.positioning.time_infront_ball,
            demos_inflicted: stats.demo.inflicted,
            demos_taken: stats.demo.taken,
            stats: serde_json::to_value(stats).unwrap_or(Value::Null),
            updated_at: Utc::now(),
        }
    }
}

/// One player's statistics within one team
#[derive(Debug, Clone, Serialize)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub team_id: Option<Uuid>,
    pub global_player_id: Option<Uuid>,
    pub name: String,
    pub platform: Option<String>,
    pub platform_id: Option<String>,
    pub car_id: Option<i64>,
    pub car_name: Option<String>,
    pub mvp: bool,
    pub steering_sensitivity: Option<f64>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub camera: Option<Value>,
    pub shots: Option<i64>,
    pub goals: Option<i64>,
    pub saves: Option<i64>,
    pub assists: Option<i64>,
    pub score: Option<i64>,
    pub shooting_percentage: Option<f64>,
    pub bpm: Option<f64>,
    pub avg_boost_amount: Option<f64>,
    pub avg_speed: Option<f64>,
    pub total_distance: Option<f64>,
    pub time_supersonic: Option<f64>,
    pub avg_distance_to_ball: Option<f64>,
    pub demos_inflicted: Option<i64>,
    pub demos_taken: Option<i64>,
    pub stats: Value,
    pub updated_at: DateTime<Utc>,
}

impl PlayerRecord {
    pub fn from_payload(
        id: Uuid,
        team_id: Uuid,
        global_player_id: Option<Uuid>,
        payload: &PlayerPayload,
    ) -> Self {
        let stats = &payload.stats;
        let identity = payload.platform_identity();
        Self {
            id,
            team_id: Some(team_id),
            global_player_id,
            name: payload.name.clone().unwrap_or_default(),
            platform: identity.map(|(platform, _)| platform.to_string()),
            platform_id: identity.map(|(_, platform_id)| platform_id.to_string()),
            car_id: payload.car_id,
            car_name: payload.car_name.clone(),
            mvp: payload.is_mvp(),
            steering_sensitivity: payload.steering_sensitivity,
            start_time: payload.start_time,
            end_time: payload.end_time,
            camera: payload.camera.clone(),
            shots: stats.core.shots,
            goals: stats.core.goals,
            saves: stats.core.saves,
            assists: stats.core.assists,
            score: stats.core.score,
            shooting_percentage: stats.core.shooting_percentage,
            bpm: stats.boost.bpm,
            avg_boost_amount: stats.boost.avg_amount,
            avg_speed: stats.movement.avg_speed,
            total_distance: stats.movement.total_distance,
            time_supersonic: stats.movement.time_supersonic_speed,
            avg_distance_to_ball: stats.positioning.avg_distance_to_ball,
            demos_inflicted: stats.demo.inflicted,
            demos_taken: stats.demo.taken,
            stats: serde_json::to_value(stats).unwrap_or(Value::Null),
            updated_at: Utc::now(),
        }
    }
}

/// Cross-game identity of a player
#[derive(Debug, Clone, Serialize)]
pub struct GlobalPlayer {
    pub id: Uuid,
    pub platform: String,
    pub platform_id: String,
    pub name: String,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Person who submitted a replay to the external API
#[derive(Debug, Clone, Serialize)]
pub struct Uploader {
    pub id: Uuid,
    pub steam_id: String,
    pub name: Option<String>,
    pub profile_url: Option<String>,
    pub avatar: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// External replay bundle (e.g. a tournament)
#[derive(Debug, Clone, Serialize)]
pub struct ReplayGroup {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Team with its players, for read-side responses
#[derive(Debug, Clone, Serialize)]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: TeamRecord,
    pub players: Vec<PlayerRecord>,
}
