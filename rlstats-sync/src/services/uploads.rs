//! Upload flow: dedupe, submit, record, store

use rlstats_common::events::{EventBus, SyncEvent};
use rlstats_common::Error;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use super::file_store::FileStore;
use super::replay_client::{ClientError, ExternalReplayClient};
use crate::db::replays;
use crate::models::Replay;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("External API error: {0}")]
    External(#[from] ClientError),

    #[error("Store error: {0}")]
    Store(#[from] Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub replay: Replay,
    /// The file was already known, locally or to the external API
    pub is_duplicate: bool,
}

/// SHA-256 of the file contents, lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub struct ReplayUploader {
    db: SqlitePool,
    client: Arc<ExternalReplayClient>,
    file_store: Arc<dyn FileStore>,
    event_bus: EventBus,
}

impl ReplayUploader {
    pub fn new(
        db: SqlitePool,
        client: Arc<ExternalReplayClient>,
        file_store: Arc<dyn FileStore>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            client,
            file_store,
            event_bus,
        }
    }

    /// Accept one replay file
    ///
    /// The same bytes uploaded twice resolve to the same replay record. A
    /// storage failure is logged and leaves `storage_path` empty.
    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadOutcome, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::InvalidFile("file is empty".to_string()));
        }
        if file_name.trim().is_empty() {
            return Err(UploadError::InvalidFile("file name is empty".to_string()));
        }

        let file_hash = content_hash(&bytes);
        if let Some(existing) = replays::find_by_hash(&self.db, &file_hash).await? {
            info!(replay_id = %existing.id, file_name, "Replay file already uploaded");
            return Ok(self.finish(existing, true));
        }

        let submitted = self.client.submit(bytes.clone(), file_name).await?;

        if let Some(existing) = replays::find_by_external_id(&self.db, &submitted.external_id).await? {
            info!(
                replay_id = %existing.id,
                external_id = %submitted.external_id,
                "Replay already recorded for this external id"
            );
            return Ok(self.finish(existing, true));
        }

        let mut replay = Replay::new(file_name, Some(submitted.external_id.clone()));
        replay.file_hash = Some(file_hash);

        if let Err(e) = replays::insert_replay(&self.db, &replay).await {
            // A concurrent upload of the same file may have inserted first
            return match replays::find_by_external_id(&self.db, &submitted.external_id).await? {
                Some(existing) => Ok(self.finish(existing, true)),
                None => Err(e.into()),
            };
        }

        match self
            .file_store
            .store(&bytes, file_name, &submitted.external_id)
            .await
        {
            Ok(path) => {
                replays::set_storage_path(&self.db, replay.id, &path).await?;
                replay.storage_path = Some(path);
            }
            Err(e) => warn!(
                replay_id = %replay.id,
                error = %e,
                "Failed to store replay file, continuing without stored copy"
            ),
        }

        info!(
            replay_id = %replay.id,
            external_id = %submitted.external_id,
            file_name,
            "Replay uploaded"
        );
        Ok(self.finish(replay, submitted.is_duplicate))
    }

    fn finish(&self, replay: Replay, is_duplicate: bool) -> UploadOutcome {
        if let Some(external_id) = replay.external_id.clone() {
            self.event_bus.emit_lossy(SyncEvent::ReplayUploaded {
                replay_id: replay.id,
                external_id,
                file_name: replay.file_name.clone(),
                is_duplicate,
                timestamp: Utc::now(),
            });
        }
        UploadOutcome { replay, is_duplicate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_hex() {
        let hash = content_hash(b"replay bytes");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash(b"replay bytes"));
        assert_ne!(hash, content_hash(b"other bytes"));
    }
}
