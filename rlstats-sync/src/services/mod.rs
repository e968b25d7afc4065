//! Services for rlstats-sync

pub mod file_store;
pub mod rate_limiter;
pub mod reconciliation;
pub mod replay_client;
pub mod replay_sync;
pub mod reprocess;
pub mod uploads;

pub use file_store::{FileStore, LocalFileStore};
pub use rate_limiter::{LimiterError, LimiterStats, RateLimitAware, RateLimiter};
pub use reconciliation::{ReconcileError, Reconciled, ReconciliationEngine};
pub use replay_client::{
    ApiResponse, ClientError, ExternalReplayClient, HttpTransport, RemoteStatus, ReplayTransport,
    SubmitResult,
};
pub use replay_sync::{CycleSummary, ReplaySyncScheduler, SyncError, SyncOutcome};
pub use reprocess::{BatchSummary, ReprocessController, ReprocessError, ReprocessReport};
pub use uploads::{ReplayUploader, UploadError, UploadOutcome};
