//! rlstats-sync library interface
//!
//! Exposes the sync services and the HTTP router for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use rlstats_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ReconciliationMode;
use crate::services::{
    ExternalReplayClient, FileStore, ReplaySyncScheduler, ReplayUploader, ReprocessController,
};

/// Largest accepted upload body
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Application state shared across handlers and CLI commands
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub client: Arc<ExternalReplayClient>,
    pub uploader: Arc<ReplayUploader>,
    pub scheduler: Arc<ReplaySyncScheduler>,
    pub reprocessor: Arc<ReprocessController>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        client: Arc<ExternalReplayClient>,
        file_store: Arc<dyn FileStore>,
        mode: ReconciliationMode,
    ) -> Self {
        let uploader = ReplayUploader::new(
            db.clone(),
            Arc::clone(&client),
            file_store,
            event_bus.clone(),
        );
        let scheduler =
            ReplaySyncScheduler::new(db.clone(), Arc::clone(&client), event_bus.clone(), mode);
        let reprocessor = ReprocessController::new(db.clone(), event_bus.clone());

        Self {
            db,
            event_bus,
            client,
            uploader: Arc::new(uploader),
            scheduler: Arc::new(scheduler),
            reprocessor: Arc::new(reprocessor),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::replay_routes())
        .merge(api::sync_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
