//! # Sync Configuration
//!
//! Configuration management for the sync engine and the server around it.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_PORT=8080                                                   │
//! │     BEACON_API_BASE_URL=https://api.example.com/v1                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/beacon/beacon.toml (Linux)                               │
//! │     ~/Library/Application Support/com.beacon.beacon/beacon.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # beacon.toml
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//! database_path = "beacon.db"
//!
//! [api]
//! base_url = "https://mybusiness.example.com/v1"
//! timeout_secs = 30
//!
//! [engine]
//! write_chunk_size = 50
//! max_concurrent_locations = 1
//! default_data_types = ["reviews", "posts"]
//!
//! [dedup]
//! placeholder_prefixes = ["Store accounts/"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use beacon_core::dedup::DEFAULT_PLACEHOLDER_PREFIX;
use beacon_core::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
use beacon_core::{DataType, DedupPolicy, RetryPolicy, RunOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Server Settings
// =============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to bind the HTTP listener to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Port for the HTTP listener.
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_path() -> PathBuf {
    PathBuf::from("beacon.db")
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
            database_path: default_database_path(),
        }
    }
}

impl ServerSettings {
    /// Returns the full bind address (addr:port).
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// External business-data API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Root URL; resource names are appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound for every external call (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Page size requested from list endpoints.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_base_url() -> String {
    "https://mybusiness.googleapis.com/v4".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Backoff parameters shared by API calls and chunk writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per external call.
    #[serde(default = "default_max_attempts")]
    pub max_api_attempts: u32,

    /// Total attempts per chunk write.
    #[serde(default = "default_max_attempts")]
    pub max_db_attempts: u32,

    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY.as_millis() as u64
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_api_attempts: default_max_attempts(),
            max_db_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    fn policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delays(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
    }

    pub fn api_policy(&self) -> RetryPolicy {
        self.policy(self.max_api_attempts)
    }

    pub fn db_policy(&self) -> RetryPolicy {
        self.policy(self.max_db_attempts)
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Orchestrator and batch writer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Records per write transaction.
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,

    /// Locations processed at once (1 = serial).
    #[serde(default = "default_max_concurrent_locations")]
    pub max_concurrent_locations: usize,

    /// Failed/attempted unit ratio that fails the whole run.
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Units attempted before the error-rate cutoff applies.
    #[serde(default = "default_error_rate_min_units")]
    pub error_rate_min_units: u32,

    /// Error records retained per run (oldest evicted).
    #[serde(default = "default_max_retained")]
    pub max_errors_retained: usize,

    /// Warnings retained per run (oldest evicted).
    #[serde(default = "default_max_retained")]
    pub max_warnings_retained: usize,

    /// Data types fetched when a request names none.
    #[serde(default = "default_data_types")]
    pub default_data_types: Vec<DataType>,
}

fn default_write_chunk_size() -> usize {
    beacon_core::DEFAULT_WRITE_CHUNK_SIZE
}

fn default_max_concurrent_locations() -> usize {
    1
}

fn default_error_rate_threshold() -> f64 {
    beacon_core::DEFAULT_ERROR_RATE_THRESHOLD
}

fn default_error_rate_min_units() -> u32 {
    beacon_core::DEFAULT_ERROR_RATE_MIN_UNITS
}

fn default_max_retained() -> usize {
    beacon_core::DEFAULT_MAX_ERRORS_RETAINED
}

fn default_data_types() -> Vec<DataType> {
    DataType::ALL.to_vec()
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            write_chunk_size: default_write_chunk_size(),
            max_concurrent_locations: default_max_concurrent_locations(),
            error_rate_threshold: default_error_rate_threshold(),
            error_rate_min_units: default_error_rate_min_units(),
            max_errors_retained: default_max_retained(),
            max_warnings_retained: default_max_retained(),
            default_data_types: default_data_types(),
        }
    }
}

// =============================================================================
// Stream Settings
// =============================================================================

/// Progress stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Heartbeat cadence (seconds), independent of unit completion.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Buffered events before senders wait on the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_heartbeat_interval() -> u64 {
    beacon_core::DEFAULT_HEARTBEAT_SECS
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for StreamSettings {
    fn default() -> Self {
        StreamSettings {
            heartbeat_interval_secs: default_heartbeat_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

// =============================================================================
// Dedup Settings
// =============================================================================

/// Tie-break rules for the dedup reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupSettings {
    /// Display-name prefixes that mark a record as unnamed.
    #[serde(default = "default_placeholder_prefixes")]
    pub placeholder_prefixes: Vec<String>,

    /// Prefer records with a real display name before recency.
    #[serde(default = "default_true")]
    pub prefer_named_records: bool,
}

fn default_placeholder_prefixes() -> Vec<String> {
    vec![DEFAULT_PLACEHOLDER_PREFIX.to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for DedupSettings {
    fn default() -> Self {
        DedupSettings {
            placeholder_prefixes: default_placeholder_prefixes(),
            prefer_named_records: true,
        }
    }
}

impl DedupSettings {
    pub fn policy(&self) -> DedupPolicy {
        DedupPolicy {
            placeholder_prefixes: self.placeholder_prefixes.clone(),
            prefer_named_records: self.prefer_named_records,
        }
    }
}

// =============================================================================
// Retention Settings
// =============================================================================

/// Cleanup of finished runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Completed runs older than this are archived; finished registry
    /// entries older than this are dropped.
    #[serde(default = "default_run_retention_hours")]
    pub run_retention_hours: u64,

    /// Cadence of the sweep task (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_run_retention_hours() -> u64 {
    24
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for RetentionSettings {
    fn default() -> Self {
        RetentionSettings {
            run_retention_hours: default_run_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl RetentionSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.run_retention_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete configuration for the engine and server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub stream: StreamSettings,

    #[serde(default)]
    pub dedup: DedupSettings,

    #[serde(default)]
    pub retention: RetentionSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (beacon.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(SyncError::InvalidConfig(format!(
                "api.base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.retry.max_api_attempts == 0 || self.retry.max_db_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry attempts must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(SyncError::InvalidConfig(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        if self.engine.write_chunk_size == 0 {
            return Err(SyncError::InvalidConfig(
                "engine.write_chunk_size must be greater than 0".into(),
            ));
        }

        if self.engine.max_concurrent_locations == 0 {
            return Err(SyncError::InvalidConfig(
                "engine.max_concurrent_locations must be greater than 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.engine.error_rate_threshold) {
            return Err(SyncError::InvalidConfig(format!(
                "engine.error_rate_threshold must be within 0.0..=1.0, got: {}",
                self.engine.error_rate_threshold
            )));
        }

        if self.stream.heartbeat_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "stream.heartbeat_interval_secs must be greater than 0".into(),
            ));
        }

        if self.stream.channel_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "stream.channel_capacity must be greater than 0".into(),
            ));
        }

        if self.retention.sweep_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "retention.sweep_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("BEACON_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Ok(port) = std::env::var("BEACON_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding port from environment");
                self.server.port = p;
            }
        }

        if let Ok(path) = std::env::var("BEACON_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.server.database_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("BEACON_API_BASE_URL") {
            debug!(url = %url, "Overriding API base URL from environment");
            self.api.base_url = url;
        }

        if let Ok(secs) = std::env::var("BEACON_API_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.api.timeout_secs = s;
            }
        }

        if let Ok(size) = std::env::var("BEACON_WRITE_CHUNK_SIZE") {
            if let Ok(n) = size.parse::<usize>() {
                self.engine.write_chunk_size = n;
            }
        }

        if let Ok(n) = std::env::var("BEACON_MAX_CONCURRENT_LOCATIONS") {
            if let Ok(n) = n.parse::<usize>() {
                debug!(n, "Overriding location concurrency from environment");
                self.engine.max_concurrent_locations = n;
            }
        }

        if let Ok(types) = std::env::var("BEACON_DATA_TYPES") {
            let parsed: Result<Vec<DataType>, _> = types
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(list) => self.engine.default_data_types = list,
                Err(e) => warn!(value = %types, error = %e, "Ignoring BEACON_DATA_TYPES"),
            }
        }

        if let Ok(secs) = std::env::var("BEACON_HEARTBEAT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.stream.heartbeat_interval_secs = s;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "beacon", "beacon")
            .map(|dirs| dirs.config_dir().join("beacon.toml"))
    }

    // =========================================================================
    // Per-run Resolution
    // =========================================================================

    /// Fills a request's options with configured defaults.
    pub fn resolve_options(&self, mut options: RunOptions) -> RunOptions {
        let requested = if options.data_types.is_empty() {
            self.engine.default_data_types.clone()
        } else {
            options.data_types
        };
        options.data_types = DataType::ordered(&requested);
        options
    }

    /// Effective location concurrency for a run. A request may lower the
    /// engine setting but never raise it.
    pub fn concurrency_for(&self, options: &RunOptions) -> usize {
        let ceiling = self.engine.max_concurrent_locations.max(1);
        options
            .max_concurrent_locations
            .unwrap_or(ceiling)
            .clamp(1, ceiling)
    }

    /// Effective error-rate cutoff for a run.
    pub fn error_rate_threshold_for(&self, options: &RunOptions) -> f64 {
        options
            .error_rate_threshold
            .unwrap_or(self.engine.error_rate_threshold)
            .clamp(0.0, 1.0)
    }
}
