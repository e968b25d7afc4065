//! External analysis API client
//!
//! Three operations (submit, fetch status, fetch full result), each routed
//! through the shared [`RateLimiter`]. HTTP itself sits behind the
//! [`ReplayTransport`] trait so the status mapping can be exercised without a
//! network.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::rate_limiter::{LimiterError, RateLimitAware, RateLimiter};
use crate::config::ApiConfig;
use crate::models::ReplayPayload;

/// Rate limiter key shared by all submissions
pub const UPLOAD_KEY: &str = "upload";

const USER_AGENT: &str = concat!("rlstats-sync/", env!("CARGO_PKG_VERSION"));

/// External client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("External API key not configured")]
    MissingCredential,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Limiter(#[from] LimiterError),
}

impl ClientError {
    /// Worth retrying later without changing any replay state
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::RateLimited | ClientError::Limiter(_))
    }
}

impl RateLimitAware for ClientError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, ClientError::RateLimited)
    }
}

/// Raw HTTP answer; status codes are interpreted by [`ExternalReplayClient`]
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Wire access to the external API
#[async_trait]
pub trait ReplayTransport: Send + Sync {
    /// `POST /v2/upload` with the file as multipart field `file`
    async fn upload(&self, file: &[u8], file_name: &str) -> Result<ApiResponse, ClientError>;

    /// `GET /replays/{id}`
    async fn get_replay(&self, external_id: &str) -> Result<ApiResponse, ClientError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig, api_key: Option<String>) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn api_key(&self) -> Result<&str, ClientError> {
        self.api_key.as_deref().ok_or(ClientError::MissingCredential)
    }

    async fn read(response: reqwest::Response) -> Result<ApiResponse, ClientError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Network(format!("Failed to read response body: {}", e)))?;
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl ReplayTransport for HttpTransport {
    async fn upload(&self, file: &[u8], file_name: &str) -> Result<ApiResponse, ClientError> {
        let part = reqwest::multipart::Part::bytes(file.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ClientError::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http_client
            .post(format!("{}/v2/upload", self.base_url))
            .header(AUTHORIZATION, self.api_key()?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Upload request failed: {}", e)))?;

        Self::read(response).await
    }

    async fn get_replay(&self, external_id: &str) -> Result<ApiResponse, ClientError> {
        let response = self
            .http_client
            .get(format!("{}/replays/{}", self.base_url, external_id))
            .header(AUTHORIZATION, self.api_key()?)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Replay request failed: {}", e)))?;

        Self::read(response).await
    }
}

/// Processing state reported by the external API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Accepted but not analysed yet (includes "not found")
    Pending,
    Ok,
    Failed { reason: String },
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub external_id: String,
    pub link: Option<String>,
    /// The file had been submitted before; `external_id` is the original one
    pub is_duplicate: bool,
}

#[derive(Debug, Deserialize)]
struct UploadBody {
    id: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: Option<String>,
}

/// Rate-limited client for the external analysis API
pub struct ExternalReplayClient {
    transport: Arc<dyn ReplayTransport>,
    limiter: Arc<RateLimiter>,
}

impl ExternalReplayClient {
    pub fn new(transport: Arc<dyn ReplayTransport>, limiter: Arc<RateLimiter>) -> Self {
        Self { transport, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Submit a replay file
    ///
    /// A 409 (already submitted) is success: the original external id comes
    /// back with `is_duplicate` set.
    pub async fn submit(&self, file: Vec<u8>, file_name: &str) -> Result<SubmitResult, ClientError> {
        let transport = Arc::clone(&self.transport);
        let file = Arc::new(file);
        let name = file_name.to_string();

        debug!(file_name, "Queuing upload");
        let response = self
            .limiter
            .execute_with_rate_limit(UPLOAD_KEY, move || {
                let transport = Arc::clone(&transport);
                let file = Arc::clone(&file);
                let name = name.clone();
                async move { reject_rate_limited(transport.upload(&file, &name).await?) }
            })
            .await?;

        let is_duplicate = match response.status {
            200 | 201 => false,
            409 => true,
            status => return Err(api_error(status, &response.body)),
        };

        let body: UploadBody = serde_json::from_str(&response.body)
            .map_err(|e| ClientError::Parse(format!("Upload response: {}", e)))?;
        let external_id = body
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ClientError::Parse("Upload response has no replay id".to_string()))?;

        if is_duplicate {
            info!(external_id = %external_id, file_name, "Duplicate replay, using existing external id");
        } else {
            info!(external_id = %external_id, file_name, "Upload accepted");
        }

        Ok(SubmitResult {
            external_id,
            link: body.location,
            is_duplicate,
        })
    }

    /// Current processing state of a submitted replay
    ///
    /// Only transient failures (rate limiting, limiter timeout/shutdown) and a
    /// missing credential are returned as `Err`; every other failure maps to
    /// [`RemoteStatus::Failed`].
    pub async fn fetch_status(&self, external_id: &str) -> Result<RemoteStatus, ClientError> {
        let response = match self.get_replay_limited(external_id).await {
            Ok(response) => response,
            Err(e) if e.is_transient() || matches!(e, ClientError::MissingCredential) => {
                return Err(e)
            }
            Err(e) => {
                warn!(external_id, error = %e, "Status check failed");
                return Ok(RemoteStatus::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let status = match response.status {
            200 => parse_status_body(&response.body),
            404 => RemoteStatus::Pending,
            401 | 403 => {
                warn!(external_id, status = response.status, "Authentication error: check the API key");
                RemoteStatus::Failed {
                    reason: api_error(response.status, &response.body).to_string(),
                }
            }
            status => RemoteStatus::Failed {
                reason: api_error(status, &response.body).to_string(),
            },
        };

        debug!(external_id, ?status, "Fetched replay status");
        Ok(status)
    }

    /// Complete per-team/per-player result document
    pub async fn fetch_full_result(&self, external_id: &str) -> Result<ReplayPayload, ClientError> {
        let response = self.get_replay_limited(external_id).await?;
        if response.status != 200 {
            return Err(api_error(response.status, &response.body));
        }

        serde_json::from_str(&response.body)
            .map_err(|e| ClientError::Parse(format!("Replay {}: {}", external_id, e)))
    }

    async fn get_replay_limited(&self, external_id: &str) -> Result<ApiResponse, ClientError> {
        let transport = Arc::clone(&self.transport);
        let id = external_id.to_string();

        self.limiter
            .execute_with_rate_limit(external_id.to_string(), move || {
                let transport = Arc::clone(&transport);
                let id = id.clone();
                async move { reject_rate_limited(transport.get_replay(&id).await?) }
            })
            .await
    }
}

/// Turn a 429 answer into an error so the limiter re-queues the call
fn reject_rate_limited(response: ApiResponse) -> Result<ApiResponse, ClientError> {
    if response.status == 429 {
        Err(ClientError::RateLimited)
    } else {
        Ok(response)
    }
}

fn api_error(status: u16, body: &str) -> ClientError {
    let message: String = body.chars().take(200).collect();
    ClientError::Api { status, message }
}

/// Map a 200 document's `status` field; no field means the replay is done
fn parse_status_body(body: &str) -> RemoteStatus {
    match serde_json::from_str::<StatusBody>(body) {
        Ok(StatusBody { status: None }) => RemoteStatus::Ok,
        Ok(StatusBody { status: Some(s) }) => match s.as_str() {
            "pending" => RemoteStatus::Pending,
            "ok" => RemoteStatus::Ok,
            other => RemoteStatus::Failed {
                reason: format!("External status '{}'", other),
            },
        },
        Err(e) => RemoteStatus::Failed {
            reason: format!("Unreadable status document: {}", e),
        },
    }
}
