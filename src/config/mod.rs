mod file_config;

pub use file_config::{FileConfig, SyncConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub api_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub api_base_url: String,
    pub api_token: String,
    pub api_timeout_sec: u64,
    pub sync: SyncSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let api_base_url = file
            .api_base_url
            .or_else(|| cli.api_base_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("api_base_url must be specified via --api-base-url or in config file")
            })?;
        let api_token = file
            .api_token
            .or_else(|| cli.api_token.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("api_token must be specified via --api-token or in config file")
            })?;

        let api_timeout_sec = file.api_timeout_sec.unwrap_or(cli.api_timeout_sec);

        // Engine tuning - merge file config with defaults
        let sync_file = file.sync.unwrap_or_default();
        let sync = SyncSettings {
            max_requests_per_window: sync_file.max_requests_per_window.unwrap_or(90),
            window_secs: sync_file.window_secs.unwrap_or(30),
            backoff_step_secs: sync_file.backoff_step_secs.unwrap_or(60),
            backoff_cap_secs: sync_file.backoff_cap_secs.unwrap_or(180),
            batch_size: sync_file.batch_size.unwrap_or(50),
            detail_batch_size: sync_file.detail_batch_size.unwrap_or(20),
            staleness_threshold_days: sync_file.staleness_threshold_days.unwrap_or(7),
            rate_limit_default_wait_hours: sync_file.rate_limit_default_wait_hours.unwrap_or(24),
            remote_max_attempts: sync_file.remote_max_attempts.unwrap_or(4),
            remote_initial_backoff_secs: sync_file.remote_initial_backoff_secs.unwrap_or(2),
        };

        Ok(Self {
            db_dir,
            api_base_url,
            api_token,
            api_timeout_sec,
            sync,
        })
    }

    pub fn library_db_path(&self) -> PathBuf {
        self.db_dir.join("library.db")
    }

    pub fn sync_db_path(&self) -> PathBuf {
        self.db_dir.join("sync.db")
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_requests_per_window: usize,
    pub window_secs: u64,
    pub backoff_step_secs: u64,
    pub backoff_cap_secs: u64,
    pub batch_size: u64,
    pub detail_batch_size: u64,
    pub staleness_threshold_days: u64,
    pub rate_limit_default_wait_hours: u64,
    pub remote_max_attempts: u32,
    pub remote_initial_backoff_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_requests_per_window: 90,
            window_secs: 30,
            backoff_step_secs: 60,
            backoff_cap_secs: 180,
            batch_size: 50,
            detail_batch_size: 20,
            staleness_threshold_days: 7,
            rate_limit_default_wait_hours: 24,
            remote_max_attempts: 4,
            remote_initial_backoff_secs: 2,
        }
    }
}
