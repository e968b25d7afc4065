//! Configuration for rlstats-sync
//!
//! Bootstrap settings come from a TOML file (every field defaulted) and can be
//! overridden from the environment or the command line:
//!
//! 1. Command-line arguments (--root-folder, --config)
//! 2. Environment variables (RLSTATS_ROOT_FOLDER, RLSTATS_API_KEY, RLSTATS_CONFIG)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use rlstats_common::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "rlstats-sync";
pub const DATABASE_FILE: &str = "rlstats.db";
pub const ENV_ROOT_FOLDER: &str = "RLSTATS_ROOT_FOLDER";
pub const ENV_API_KEY: &str = "RLSTATS_API_KEY";
pub const ENV_CONFIG: &str = "RLSTATS_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Folder holding the database and stored replay files
    pub root_folder: Option<PathBuf>,

    /// HTTP listen address
    pub bind_address: String,

    /// Capacity of the change-notification channel
    pub event_capacity: usize,

    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub reconciliation: ReconciliationConfig,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: "127.0.0.1:5740".to_string(),
            event_capacity: 100,
            api: ApiConfig::default(),
            rate_limit: RateLimitConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// External analysis API settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Static credential sent as the `Authorization` header
    pub api_key: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ballchasing.com/api".to_string(),
            api_key: None,
            http_timeout_secs: 30,
        }
    }
}

/// Dual-window rate limit shared by every external call
///
/// Defaults sit just under the provider's 4/s and 2000/h patron limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_second: u32,
    pub per_hour: u32,
    /// Pause inserted between consecutive dispatches
    pub dispatch_spacing_ms: u64,
    /// Delay before a 429-rejected request is put back at the head of the queue
    pub retry_backoff_ms: u64,
    /// Per-call timeout; `None` waits indefinitely
    pub request_timeout_ms: Option<u64>,
    /// Upper bound on 429 re-queues; `None` retries forever
    pub max_rate_limit_retries: Option<u32>,
    /// Interval of the queue statistics log line
    pub stats_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 3,
            per_hour: 1800,
            dispatch_spacing_ms: 50,
            retry_backoff_ms: 2000,
            request_timeout_ms: None,
            max_rate_limit_retries: None,
            stats_interval_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn dispatch_spacing(&self) -> Duration {
        Duration::from_millis(self.dispatch_spacing_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.per_second == 0 || self.per_hour == 0 {
            return Err(Error::Config(
                "rate_limit.per_second and rate_limit.per_hour must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Periodic scan settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 15,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// What to do when reconciliation fails for a reason other than rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationMode {
    /// Mark the replay completed anyway and record diagnostics
    #[default]
    Lenient,
    /// Mark the replay failed
    Strict,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub mode: ReconciliationMode,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive (trace, debug, info, warn, error); RUST_LOG overrides
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from an explicit path, `RLSTATS_CONFIG`, or the default location
    ///
    /// A missing file is not an error; built-in defaults are used.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from))
            .or_else(|| rlstats_common::config::default_config_path(SERVICE_NAME));

        let config = match path {
            Some(path) => match rlstats_common::config::load_toml::<SyncConfig>(&path)? {
                Some(config) => {
                    info!("Configuration loaded from {}", path.display());
                    config
                }
                None => {
                    info!("No config file at {}, using defaults", path.display());
                    SyncConfig::default()
                }
            },
            None => SyncConfig::default(),
        };

        config.rate_limit.validate()?;
        Ok(config)
    }

    /// Resolve the root folder (CLI → ENV → TOML → OS default)
    pub fn resolve_root_folder(&self, cli_arg: Option<&Path>) -> PathBuf {
        rlstats_common::config::resolve_root_folder(
            cli_arg,
            ENV_ROOT_FOLDER,
            self.root_folder.as_deref(),
        )
    }

    /// Resolve the external API key
    ///
    /// **Priority:** ENV → TOML
    pub fn resolve_api_key(&self) -> Result<String> {
        let env_key = std::env::var(ENV_API_KEY).ok().filter(|k| is_valid_key(k));
        let toml_key = self.api.api_key.clone().filter(|k| is_valid_key(k));

        if env_key.is_some() && toml_key.is_some() {
            warn!("API key found in both environment and TOML. Using environment (highest priority).");
        }

        if let Some(key) = env_key {
            info!("API key loaded from environment variable");
            return Ok(key);
        }

        if let Some(key) = toml_key {
            info!("API key loaded from TOML config");
            return Ok(key);
        }

        Err(Error::Config(format!(
            "External API key not configured. Set {} or api.api_key in {}.toml",
            ENV_API_KEY, SERVICE_NAME
        )))
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
