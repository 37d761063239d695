//! Configuration types for hls-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Segment fetching configuration (concurrency, request policy, retry)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of concurrent segment workers per task (default: 3)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for a single manifest or segment request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Client identifier sent as `User-Agent` on every request
    ///
    /// Many HLS origins reject requests without a browser-like identifier.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retry policy for individual segments (default: no retry)
    #[serde(default = "default_segment_retry")]
    pub segment_retry: RetryConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            segment_retry: default_segment_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first failure
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Reassembly tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReassemblyConfig {
    /// Artifacts at or above this size are merged in batches (default: 500 MiB)
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,

    /// Segments copied per batch before yielding (default: 5)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            large_file_threshold: default_large_file_threshold(),
            batch_size: default_batch_size(),
        }
    }
}

/// Output delivery configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Directory the default file sink writes into (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Artifacts smaller than this are handed off in one call (default: 50 MiB)
    #[serde(default = "default_single_shot_limit")]
    pub single_shot_limit: u64,

    /// Chunk size for chunked handoff (default: 5 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause after every N chunks (default: 5)
    #[serde(default = "default_throttle_every")]
    pub throttle_every: usize,

    /// Length of the pause in milliseconds (default: 50)
    #[serde(default = "default_throttle_pause_ms")]
    pub throttle_pause_ms: u64,

    /// File collision handling
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            single_shot_limit: default_single_shot_limit(),
            chunk_size: default_chunk_size(),
            throttle_every: default_throttle_every(),
            throttle_pause_ms: default_throttle_pause_ms(),
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Fail the delivery
    Skip,
}

/// Data storage and retention configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./hls-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Grace window before a completed task's segments are purged (default: 30 seconds)
    #[serde(default = "default_completed_cleanup_delay", with = "duration_serde")]
    pub completed_cleanup_delay: Duration,

    /// Segments older than this are swept regardless of task state (default: 24 hours)
    #[serde(default = "default_segment_max_age", with = "duration_serde")]
    pub segment_max_age: Duration,

    /// How often the sweep runs (default: 1 hour)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Delay before the first sweep after startup (default: 5 seconds)
    #[serde(default = "default_sweep_startup_delay", with = "duration_serde")]
    pub sweep_startup_delay: Duration,

    /// Finished task records older than this are pruned (default: 24 hours)
    #[serde(default = "default_task_retention", with = "duration_serde")]
    pub task_retention: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            completed_cleanup_delay: default_completed_cleanup_delay(),
            segment_max_age: default_segment_max_age(),
            sweep_interval: default_sweep_interval(),
            sweep_startup_delay: default_sweep_startup_delay(),
            task_retention: default_task_retention(),
        }
    }
}

/// Main configuration for [`HlsDownloader`](crate::HlsDownloader)
///
/// Fields are organized into sub-configs:
/// - [`download`](DownloadConfig) - concurrency, request headers, segment retry (flattened)
/// - [`reassembly`](ReassemblyConfig) - large-file threshold and batch size
/// - [`delivery`](DeliveryConfig) - output directory and chunked handoff tuning
/// - [`persistence`](PersistenceConfig) - database path and retention windows
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Segment fetching settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Reassembly settings
    #[serde(default)]
    pub reassembly: ReassemblyConfig,

    /// Output delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Data storage and retention
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Capacity of the broadcast event channel (default: 1000)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Maximum time shutdown waits for active tasks (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            reassembly: ReassemblyConfig::default(),
            delivery: DeliveryConfig::default(),
            persistence: PersistenceConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Config {
    /// Check settings that would make the pipeline unusable
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(config_error(
                "concurrency must be at least 1",
                "concurrency",
            ));
        }
        if self.reassembly.batch_size == 0 {
            return Err(config_error(
                "batch size must be at least 1",
                "reassembly.batch_size",
            ));
        }
        if self.delivery.chunk_size == 0 {
            return Err(config_error(
                "chunk size must be at least 1 byte",
                "delivery.chunk_size",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(config_error(
                "event channel capacity must be at least 1",
                "event_channel_capacity",
            ));
        }
        if self.persistence.sweep_interval.is_zero() {
            return Err(config_error(
                "sweep interval must be greater than zero",
                "persistence.sweep_interval",
            ));
        }
        let multiplier = self.download.segment_retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(config_error(
                "backoff multiplier must be a finite value >= 1.0",
                "segment_retry.backoff_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

const MIB: u64 = 1024 * 1024;

fn default_concurrency() -> usize {
    3
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_segment_retry() -> RetryConfig {
    RetryConfig::default()
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_large_file_threshold() -> u64 {
    500 * MIB
}

fn default_batch_size() -> usize {
    5
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_single_shot_limit() -> u64 {
    50 * MIB
}

fn default_chunk_size() -> usize {
    5 * MIB as usize
}

fn default_throttle_every() -> usize {
    5
}

fn default_throttle_pause_ms() -> u64 {
    50
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./hls-dl.db")
}

fn default_completed_cleanup_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_segment_max_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_startup_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_task_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
