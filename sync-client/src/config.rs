//! Configuration loading for tasksync.
//!
//! Configuration is loaded from a TOML file (default: `tasksync.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tasksync_cache::CacheTtls;
use tasksync_types::ConflictStrategy;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Sync coordinator configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Storage locations.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Sync coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How conflicts are resolved (default: keep_newest).
    #[serde(default)]
    pub strategy: ConflictStrategy,
    /// Start the auto-sync timer in `SyncCoordinator::start` (default: false).
    #[serde(default)]
    pub auto_sync: bool,
    /// Auto-sync interval in seconds (default: 300).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Limit for each remote call in seconds (default: 30).
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    /// Push attempts before a deferred snapshot is dropped (default: 5).
    #[serde(default = "default_push_max_attempts")]
    pub push_max_attempts: u32,
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for per-day task lists in seconds (default: 900).
    #[serde(default = "default_day_tasks_ttl_secs")]
    pub day_tasks_ttl_secs: u64,
    /// TTL for per-project task lists in seconds (default: 600).
    #[serde(default = "default_project_tasks_ttl_secs")]
    pub project_tasks_ttl_secs: u64,
    /// TTL for the project list in seconds (default: 1800).
    #[serde(default = "default_projects_ttl_secs")]
    pub projects_ttl_secs: u64,
    /// Interval of the expired-entry sweep in seconds (default: 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Storage locations. Relative paths resolve against the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local JSON store (default: tasks.json).
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,
    /// Shared directory holding the remote document (default: remote).
    #[serde(default = "default_remote_dir")]
    pub remote_dir: PathBuf,
}

// Default value functions
fn default_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_push_max_attempts() -> u32 {
    5
}

fn default_day_tasks_ttl_secs() -> u64 {
    15 * 60
}

fn default_project_tasks_ttl_secs() -> u64 {
    10 * 60
}

fn default_projects_ttl_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_local_path() -> PathBuf {
    PathBuf::from("tasks.json")
}

fn default_remote_dir() -> PathBuf {
    PathBuf::from("remote")
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::default(),
            auto_sync: false,
            interval_secs: default_interval_secs(),
            remote_timeout_secs: default_remote_timeout_secs(),
            push_max_attempts: default_push_max_attempts(),
        }
    }
}

impl SyncConfig {
    /// Auto-sync interval. Zero is raised to one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Limit for each remote call. Zero is raised to one second.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.max(1))
    }

    /// Set the conflict strategy.
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the remote call limit.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_secs = timeout.as_secs().max(1);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            day_tasks_ttl_secs: default_day_tasks_ttl_secs(),
            project_tasks_ttl_secs: default_project_tasks_ttl_secs(),
            projects_ttl_secs: default_projects_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// TTL tiers for the cache helpers.
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            day_tasks: Duration::from_secs(self.day_tasks_ttl_secs),
            project_tasks: Duration::from_secs(self.project_tasks_ttl_secs),
            projects: Duration::from_secs(self.projects_ttl_secs),
        }
    }

    /// Interval of the expired-entry sweep. Zero is raised to one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            remote_dir: default_remote_dir(),
        }
    }
}

impl StorageConfig {
    /// Local store path, resolved against `base`.
    pub fn local_path_in(&self, base: &Path) -> PathBuf {
        base.join(&self.local_path)
    }

    /// Remote directory, resolved against `base`.
    pub fn remote_dir_in(&self, base: &Path) -> PathBuf {
        base.join(&self.remote_dir)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to serialize config: {0}")]
    SerializeError(toml::ser::Error),
}
