//! HTTP API handlers for rlstats-sync
//!
//! REST endpoints for uploads, status checks and reprocessing, plus an SSE
//! stream of replay state changes.

pub mod health;
pub mod replays;
pub mod sse;
pub mod sync;

pub use health::health_routes;
pub use replays::replay_routes;
pub use sse::event_stream;
pub use sync::sync_routes;
