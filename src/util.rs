use std::path::PathBuf;

use crate::config::{Config, StorageConfig};

const CONFIG_PATH: &str = "WINSENTRY_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./winsentry.json";

pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const DB_PATH: &str = "WINSENTRY_DB";

pub fn get_db_path() -> Option<PathBuf> {
    std::env::var(DB_PATH).ok().map(PathBuf::from)
}

const MAX_WORKERS: &str = "WINSENTRY_MAX_WORKERS";

pub fn get_max_workers() -> Option<usize> {
    std::env::var(MAX_WORKERS)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|workers| *workers > 0)
}

/// Apply environment overrides on top of a loaded config
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(db_path) = get_db_path() {
        let retention_days = config.storage.retention_days();
        config.storage = StorageConfig::Sqlite {
            path: db_path,
            retention_days,
        };
    }

    if let Some(max_workers) = get_max_workers() {
        config.executor.max_workers = max_workers;
    }
}
