//! Replay endpoints: upload, listing, detail, status check, reprocessing

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rlstats_common::ReplayStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{groups, players, replays, teams, uploaders};
use crate::error::{ApiError, ApiResult};
use crate::models::{Replay, ReplayGroup, TeamColor, TeamDetail, Uploader};
use crate::services::{BatchSummary, ReprocessReport, SyncOutcome};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// POST /replays response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub replay: Replay,
    pub is_duplicate: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /replays response
#[derive(Debug, Serialize)]
pub struct ReplayList {
    pub replays: Vec<Replay>,
    pub limit: i64,
    pub offset: i64,
}

/// GET /replays/:id response
#[derive(Debug, Serialize)]
pub struct ReplayDetail {
    #[serde(flatten)]
    pub replay: Replay,
    pub blue: Option<TeamDetail>,
    pub orange: Option<TeamDetail>,
    pub uploader: Option<Uploader>,
    pub groups: Vec<ReplayGroup>,
}

/// GET /replays/:id/status response
#[derive(Debug, Serialize)]
pub struct StatusCheckResponse {
    pub replay_id: Uuid,
    /// Status after the pass
    pub current_status: ReplayStatus,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Serialize)]
pub struct FailedCount {
    pub count: i64,
}

/// POST /replays
///
/// Multipart upload with the replay in field `file`. 201 for a new replay,
/// 200 when the file was already known.
pub async fn upload_replay(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.replay").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;

    let outcome = state.uploader.upload(bytes.to_vec(), &file_name).await?;
    let status = if outcome.is_duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(UploadResponse {
            replay: outcome.replay,
            is_duplicate: outcome.is_duplicate,
        }),
    ))
}

/// GET /replays?limit=&offset=
///
/// Newest upload first.
pub async fn list_replays(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ReplayList>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let replays = replays::list_replays(&state.db, limit, offset).await?;
    Ok(Json(ReplayList {
        replays,
        limit,
        offset,
    }))
}

/// GET /replays/:id
pub async fn get_replay(
    State(state): State<AppState>,
    Path(replay_id): Path<Uuid>,
) -> ApiResult<Json<ReplayDetail>> {
    let replay = replays::find_by_id(&state.db, replay_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Replay {}", replay_id)))?;

    let blue = team_detail(&state, replay_id, TeamColor::Blue).await?;
    let orange = team_detail(&state, replay_id, TeamColor::Orange).await?;
    let uploader = match replay.uploader_id {
        Some(id) => uploaders::find_by_id(&state.db, id).await?,
        None => None,
    };
    let groups = groups::list_groups_for_replay(&state.db, replay_id).await?;

    Ok(Json(ReplayDetail {
        replay,
        blue,
        orange,
        uploader,
        groups,
    }))
}

async fn team_detail(
    state: &AppState,
    replay_id: Uuid,
    color: TeamColor,
) -> ApiResult<Option<TeamDetail>> {
    let Some(team) = teams::find_team_for_replay(&state.db, replay_id, color).await? else {
        return Ok(None);
    };
    let players = players::list_players_for_team(&state.db, team.id).await?;
    Ok(Some(TeamDetail { team, players }))
}

/// GET /replays/:id/status
///
/// Runs one sync pass for the replay now and reports the result.
pub async fn check_status(
    State(state): State<AppState>,
    Path(replay_id): Path<Uuid>,
) -> ApiResult<Json<StatusCheckResponse>> {
    let outcome = state.scheduler.sync_replay(replay_id).await?;
    let replay = replays::find_by_id(&state.db, replay_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Replay {}", replay_id)))?;

    Ok(Json(StatusCheckResponse {
        replay_id,
        current_status: replay.status,
        outcome,
    }))
}

/// POST /replays/:id/reprocess
pub async fn reprocess_replay(
    State(state): State<AppState>,
    Path(replay_id): Path<Uuid>,
) -> ApiResult<Json<ReprocessReport>> {
    Ok(Json(state.reprocessor.reprocess_one(replay_id).await?))
}

/// POST /replays/reprocess-all
///
/// 500 only when the batch failed as a whole; partial failures are listed in
/// the summary.
pub async fn reprocess_all(
    State(state): State<AppState>,
) -> (StatusCode, Json<BatchSummary>) {
    let summary = state.reprocessor.reprocess_all().await;
    let status = if summary.is_total_failure() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(summary))
}

/// GET /replays/failed/count
pub async fn failed_count(State(state): State<AppState>) -> ApiResult<Json<FailedCount>> {
    let count = replays::count_by_status(&state.db, ReplayStatus::Failed).await?;
    Ok(Json(FailedCount { count }))
}

pub fn replay_routes() -> Router<AppState> {
    Router::new()
        .route("/replays", post(upload_replay).get(list_replays))
        .route("/replays/failed/count", get(failed_count))
        .route("/replays/reprocess-all", post(reprocess_all))
        .route("/replays/:id", get(get_replay))
        .route("/replays/:id/status", get(check_status))
        .route("/replays/:id/reprocess", post(reprocess_replay))
}
