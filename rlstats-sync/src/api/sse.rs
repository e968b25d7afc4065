//! Server-Sent Events stream of replay changes

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    /// Only forward events about this replay (cycle summaries are always sent)
    pub replay_id: Option<Uuid>,
}

/// GET /events
///
/// Streams ReplayStatusChanged, ReplayUploaded and SyncCycleCompleted, each as
/// an SSE event named after its type with the JSON event as data.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(replay_id = ?filter.replay_id, "New SSE client connected");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE client lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if let (Some(wanted), Some(id)) = (filter.replay_id, event.replay_id()) {
                if wanted != id {
                    continue;
                }
            }

            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(event_json) => {
                    debug!("SSE: Broadcasting {}", event_type);
                    yield Ok(Event::default().event(event_type).data(event_json));
                }
                Err(e) => warn!("SSE: Failed to serialize event {}: {}", event_type, e),
            }
        }
        debug!("SSE: Event bus closed, ending stream");
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}
