//! Manual sync trigger

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::services::CycleSummary;
use crate::AppState;

/// POST /sync/scan
///
/// Runs one scheduler cycle immediately and returns its summary. A cycle
/// where the scan itself or every replay failed answers 500.
pub async fn scan(State(state): State<AppState>) -> (StatusCode, Json<CycleSummary>) {
    let summary = state.scheduler.run_cycle().await;
    let status = if summary.is_total_failure() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(summary))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new().route("/sync/scan", post(scan))
}
