use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub api_timeout_sec: Option<u64>,

    // Engine tuning
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub max_requests_per_window: Option<usize>,
    pub window_secs: Option<u64>,
    pub backoff_step_secs: Option<u64>,
    pub backoff_cap_secs: Option<u64>,
    pub batch_size: Option<u64>,
    pub detail_batch_size: Option<u64>,
    pub staleness_threshold_days: Option<u64>,
    pub rate_limit_default_wait_hours: Option<u64>,
    pub remote_max_attempts: Option<u32>,
    pub remote_initial_backoff_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
