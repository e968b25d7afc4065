//! Typed view of the external analysis API's replay document
//!
//! The API omits fields freely (pending replays carry almost nothing, older
//! replays lack newer stats), so every field is optional and defaulted here.
//! Stat groups keep unrecognised keys in `extra` so the full object can be
//! stored back as JSON without loss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Full replay document returned by `GET /replays/{id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayPayload {
    pub id: Option<String>,
    pub status: Option<String>,
    pub link: Option<String>,
    pub created: Option<String>,
    pub uploader: Option<UploaderPayload>,
    pub rocket_league_id: Option<String>,
    pub match_guid: Option<String>,
    pub title: Option<String>,
    pub map_code: Option<String>,
    pub map_name: Option<String>,
    pub match_type: Option<String>,
    pub team_size: Option<i64>,
    pub playlist_id: Option<String>,
    pub playlist_name: Option<String>,
    pub duration: Option<i64>,
    pub overtime: Option<bool>,
    pub overtime_seconds: Option<i64>,
    pub season: Option<i64>,
    pub season_type: Option<String>,
    pub date: Option<String>,
    pub date_has_timezone: Option<bool>,
    pub visibility: Option<String>,
    pub groups: Vec<GroupPayload>,
    pub blue: Option<TeamPayload>,
    pub orange: Option<TeamPayload>,
}

impl ReplayPayload {
    pub fn team(&self, color: TeamColor) -> Option<&TeamPayload> {
        match color {
            TeamColor::Blue => self.blue.as_ref(),
            TeamColor::Orange => self.orange.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderPayload {
    pub steam_id: Option<String>,
    pub name: Option<String>,
    pub profile_url: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupPayload {
    pub id: Option<String>,
    pub name: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamPayload {
    pub color: Option<String>,
    pub name: Option<String>,
    pub players: Vec<PlayerPayload>,
    pub stats: TeamStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerPayload {
    pub name: Option<String>,
    pub id: Option<PlatformId>,
    pub car_id: Option<i64>,
    pub car_name: Option<String>,
    pub camera: Option<Value>,
    pub steering_sensitivity: Option<f64>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub mvp: Option<bool>,
    pub stats: PlayerStats,
}

impl PlayerPayload {
    /// Platform identity, present only when both parts are non-empty
    pub fn platform_identity(&self) -> Option<(&str, &str)> {
        let id = self.id.as_ref()?;
        let platform = id.platform.as_deref().filter(|p| !p.is_empty())?;
        let platform_id = id.id.as_deref().filter(|p| !p.is_empty())?;
        Some((platform, platform_id))
    }

    /// MVP flag from the top level, falling back to the core stats
    pub fn is_mvp(&self) -> bool {
        self.mvp.or(self.stats.core.mvp).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformId {
    pub platform: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamStats {
    pub ball: BallStats,
    pub core: CoreStats,
    pub boost: BoostStats,
    pub movement: MovementStats,
    pub positioning: PositioningStats,
    pub demo: DemoStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStats {
    pub core: CoreStats,
    pub boost: BoostStats,
    pub movement: MovementStats,
    pub positioning: PositioningStats,
    pub demo: DemoStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BallStats {
    pub possession_time: Option<f64>,
    pub time_in_side: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreStats {
    pub shots: Option<i64>,
    pub shots_against: Option<i64>,
    pub goals: Option<i64>,
    pub goals_against: Option<i64>,
    pub saves: Option<i64>,
    pub assists: Option<i64>,
    pub score: Option<i64>,
    pub mvp: Option<bool>,
    pub shooting_percentage: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostStats {
    pub bpm: Option<f64>,
    pub bcpm: Option<f64>,
    pub avg_amount: Option<f64>,
    pub amount_collected: Option<f64>,
    pub amount_stolen: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementStats {
    pub avg_speed: Option<f64>,
    pub total_distance: Option<f64>,
    pub time_supersonic_speed: Option<f64>,
    pub time_powerslide: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositioningStats {
    pub avg_distance_to_ball: Option<f64>,
    pub time_defensive_third: Option<f64>,
    pub time_neutral_third: Option<f64>,
    pub time_offensive_third: Option<f64>,
    pub time_behind_ball: Option<f64>,
    pub time_infront_ball: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoStats {
    pub inflicted: Option<i64>,
    pub taken: Option<i64>,
}

/// Side of the pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamColor {
    Blue,
    Orange,
}

impl TeamColor {
    pub const BOTH: [TeamColor; 2] = [TeamColor::Blue, TeamColor::Orange];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeamColor::Blue => "blue",
            TeamColor::Orange => "orange",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blue" => Some(TeamColor::Blue),
            "orange" => Some(TeamColor::Orange),
            _ => None,
        }
    }
}

impl std::fmt::Display for TeamColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sparse_document_deserializes() {
        let payload: ReplayPayload = serde_json::from_value(json!({
            "id": "abc",
            "status": "pending"
        }))
        .unwrap();

        assert_eq!(payload.id.as_deref(), Some("abc"));
        assert!(payload.blue.is_none());
        assert!(payload.groups.is_empty());
    }

    #[test]
    fn test_unknown_stat_keys_survive_round_trip() {
        let payload: TeamPayload = serde_json::from_value(json!({
            "color": "blue",
            "stats": {
                "core": { "goals": 3, "shots": 7 },
                "boost": { "bpm": 410.5, "time_zero_boost": 12.25 }
            }
        }))
        .unwrap();

        assert_eq!(payload.stats.core.goals, Some(3));
        assert_eq!(payload.stats.boost.bpm, Some(410.5));

        let stored = serde_json::to_value(&payload.stats).unwrap();
        assert_eq!(stored["boost"]["time_zero_boost"], json!(12.25));
    }

    #[test]
    fn test_platform_identity_requires_both_parts() {
        let mut player = PlayerPayload::default();
        assert!(player.platform_identity().is_none());

        player.id = Some(PlatformId {
            platform: Some("steam".into()),
            id: Some(String::new()),
        });
        assert!(player.platform_identity().is_none());

        player.id = Some(PlatformId {
            platform: Some("steam".into()),
            id: Some("7656".into()),
        });
        assert_eq!(player.platform_identity(), Some(("steam", "7656")));
    }

    #[test]
    fn test_mvp_falls_back_to_core_stats() {
        let mut player = PlayerPayload::default();
        player.stats.core.mvp = Some(true);
        assert!(player.is_mvp());

        player.mvp = Some(false);
        assert!(!player.is_mvp());
    }
}
