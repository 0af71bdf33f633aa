use std::path::PathBuf;

use serde::Deserialize;
use tracing::trace;

use crate::model::{AggregationPolicy, NotificationTransport, TargetSpec};

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (history older than this is purged)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl StorageConfig {
    pub fn retention_days(&self) -> u32 {
        match self {
            StorageConfig::None => default_retention_days(),
            StorageConfig::Sqlite { retention_days, .. } => *retention_days,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./winsentry.db")
}

fn default_retention_days() -> u32 {
    30
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Storage configuration (defaults to SQLite)
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub thresholds: ThresholdDefaults,

    /// Used when the store has no transport configured yet
    #[serde(default)]
    pub notifications: Option<NotificationTransport>,

    /// Targets created on the first start against an empty store
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Global cap on concurrently running scripts
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,

    /// Captured bytes per stream; the rest is drained and discarded
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Where inline scripts are materialized (system temp dir if unset)
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            timeout_secs: default_script_timeout(),
            max_output_bytes: default_max_output_bytes(),
            script_dir: None,
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_script_timeout() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Upper bound of the backed-off interval
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// How long removal waits for an in-flight probe or script
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
            max_backoff_secs: default_max_backoff(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    3600
}

fn default_shutdown_grace() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Default cooldown as a multiple of the target's monitoring interval
    #[serde(default = "default_cooldown_intervals")]
    pub cooldown_intervals: u32,

    /// Default cooldown for recurring rules
    #[serde(default = "default_recurring_cooldown")]
    pub recurring_cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_intervals: default_cooldown_intervals(),
            recurring_cooldown_secs: default_recurring_cooldown(),
        }
    }
}

fn default_cooldown_intervals() -> u32 {
    10
}

fn default_recurring_cooldown() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdDefaults {
    #[serde(default = "default_critical_multiplier")]
    pub critical_multiplier: f32,

    #[serde(default)]
    pub aggregation: AggregationPolicy,
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            critical_multiplier: default_critical_multiplier(),
            aggregation: AggregationPolicy::default(),
        }
    }
}

fn default_critical_multiplier() -> f32 {
    1.25
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
