//! Replay record and its descriptive metadata

use chrono::{DateTime, Utc};
use rlstats_common::ReplayStatus;
use serde::Serialize;
use uuid::Uuid;

use super::payload::ReplayPayload;

/// One uploaded replay file and its sync lifecycle
#[derive(Debug, Clone, Serialize)]
pub struct Replay {
    pub id: Uuid,
    /// Identifier assigned by the external API; absent if submission never succeeded
    pub external_id: Option<String>,
    pub file_name: String,
    /// SHA-256 of the uploaded bytes (hex)
    pub file_hash: Option<String>,
    pub storage_path: Option<String>,
    pub status: ReplayStatus,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub metadata: ReplayMetadata,
    pub blue_team_id: Option<Uuid>,
    pub orange_team_id: Option<Uuid>,
    pub uploader_id: Option<Uuid>,
    /// Reconciliation problems recorded when the replay completed best-effort
    pub sync_diagnostics: Option<String>,
}

impl Replay {
    /// New replay in `processing`, as created by the upload flow
    pub fn new(file_name: impl Into<String>, external_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id,
            file_name: file_name.into(),
            file_hash: None,
            storage_path: None,
            status: ReplayStatus::Processing,
            uploaded_at: Utc::now(),
            processed_at: None,
            metadata: ReplayMetadata::default(),
            blue_team_id: None,
            orange_team_id: None,
            uploader_id: None,
            sync_diagnostics: None,
        }
    }

    /// `processed_at` is set exactly when the status is terminal
    pub fn processed_at_consistent(&self) -> bool {
        self.processed_at.is_some() == self.status.requires_processed_at()
    }

    pub fn has_teams(&self) -> bool {
        self.blue_team_id.is_some() && self.orange_team_id.is_some()
    }
}

/// Descriptive fields filled in by reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayMetadata {
    pub title: Option<String>,
    pub rocket_league_id: Option<String>,
    pub match_guid: Option<String>,
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
    pub played_at: Option<String>,
    pub played_at_has_timezone: Option<bool>,
    pub visibility: Option<String>,
    pub link: Option<String>,
    pub external_created: Option<String>,
}

impl ReplayMetadata {
    pub fn from_payload(payload: &ReplayPayload) -> Self {
        Self {
            title: payload.title.clone(),
            rocket_league_id: payload.rocket_league_id.clone(),
            match_guid: payload.match_guid.clone(),
            map_code: payload.map_code.clone(),
            map_name: payload.map_name.clone(),
            match_type: payload.match_type.clone(),
            team_size: payload.team_size,
            playlist_id: payload.playlist_id.clone(),
            playlist_name: payload.playlist_name.clone(),
            duration: payload.duration,
            overtime: payload.overtime,
            overtime_seconds: payload.overtime_seconds,
            season: payload.season,
            season_type: payload.season_type.clone(),
            played_at: payload.date.clone(),
            played_at_has_timezone: payload.date_has_timezone,
            visibility: payload.visibility.clone(),
            link: payload.link.clone(),
            external_created: payload.created.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_replay_is_processing_without_processed_at() {
        let replay = Replay::new("match.replay", Some("abc".to_string()));
        assert_eq!(replay.status, ReplayStatus::Processing);
        assert!(replay.processed_at.is_none());
        assert!(replay.processed_at_consistent());
        assert!(!replay.has_teams());
    }

    #[test]
    fn test_metadata_copies_descriptive_fields() {
        let payload = ReplayPayload {
            title: Some("Ranked Doubles".into()),
            map_name: Some("DFH Stadium".into()),
            duration: Some(300),
            date: Some("2024-03-01T20:15:00+01:00".into()),
            date_has_timezone: Some(true),
            ..Default::default()
        };

        let metadata = ReplayMetadata::from_payload(&payload);
        assert_eq!(metadata.title.as_deref(), Some("Ranked Doubles"));
        assert_eq!(metadata.duration, Some(300));
        assert_eq!(metadata.played_at_has_timezone, Some(true));
        assert!(metadata.season.is_none());
    }
}
