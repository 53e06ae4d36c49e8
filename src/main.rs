use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use melosync::config::{AppConfig, CliConfig, FileConfig};
use melosync::library_store::SqliteLibraryStore;
use melosync::remote::{HttpMusicApi, RemoteSettings};
use melosync::sync::fetchers::FetcherContext;
use melosync::sync::{
    OrchestratorSettings, ProgressSink, RateLimiter, RateLimiterConfig, SyncOrchestrator,
};
use melosync::sync_store::{SqliteSyncStateStore, SyncRunKind, SyncRunStatus, SyncStateStore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(name = "melosync", about = "Replicates a remote music library into a local store")]
struct CliArgs {
    /// Directory holding library.db and sync.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Base URL of the remote music library API.
    #[clap(long)]
    pub api_base_url: Option<String>,

    /// Bearer token for the remote API.
    #[clap(long)]
    pub api_token: Option<String>,

    /// Timeout in seconds for remote API requests.
    #[clap(long, default_value_t = 30)]
    pub api_timeout_sec: u64,

    /// Optional TOML config file; values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sync against the remote library.
    Sync {
        /// Stop the saved-track phase once a page adds nothing new.
        #[clap(long)]
        incremental: bool,

        /// Resume the latest interrupted run instead of starting a new one.
        #[clap(long)]
        resume: bool,
    },
    /// Show the latest run and its per-phase progress.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        api_base_url: cli_args.api_base_url.clone(),
        api_token: cli_args.api_token.clone(),
        api_timeout_sec: cli_args.api_timeout_sec,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening library database at {:?}", config.library_db_path());
    let library = Arc::new(SqliteLibraryStore::new(config.library_db_path())?);
    let sync_store = Arc::new(SqliteSyncStateStore::new(config.sync_db_path())?);

    let api = Arc::new(HttpMusicApi::new(RemoteSettings {
        base_url: config.api_base_url.clone(),
        api_token: config.api_token.clone(),
        timeout_secs: config.api_timeout_sec,
        max_attempts: config.sync.remote_max_attempts,
        initial_backoff_secs: config.sync.remote_initial_backoff_secs,
    }));
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        max_requests: config.sync.max_requests_per_window,
        window: Duration::from_secs(config.sync.window_secs),
        backoff_step: Duration::from_secs(config.sync.backoff_step_secs),
        backoff_cap: Duration::from_secs(config.sync.backoff_cap_secs),
    }));
    let ctx = FetcherContext {
        api,
        library,
        limiter,
    };
    let settings = OrchestratorSettings {
        batch_size: config.sync.batch_size,
        detail_batch_size: config.sync.detail_batch_size,
        staleness_threshold_secs: config.sync.staleness_threshold_days as i64 * 86_400,
        rate_limit_default_wait_secs: config.sync.rate_limit_default_wait_hours * 3_600,
    };

    match cli_args.command {
        Command::Sync {
            incremental,
            resume,
        } => run_sync(ctx, sync_store, settings, incremental, resume).await,
        Command::Status => show_status(ctx, sync_store, settings),
    }
}

async fn run_sync(
    ctx: FetcherContext,
    sync_store: Arc<SqliteSyncStateStore>,
    settings: OrchestratorSettings,
    incremental: bool,
    resume: bool,
) -> Result<()> {
    let (progress, mut progress_rx) = ProgressSink::new();
    let orchestrator = SyncOrchestrator::new(ctx, sync_store.clone(), progress, settings);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current batch and stopping");
            signal_cancel.cancel();
        }
    });

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>12} [{bar:40}] {pos}/{len} {msg}")
            .expect("Invalid progress bar template")
            .progress_chars("=> "),
    );
    let bar_task = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                bar.set_prefix(event.phase.as_str());
                if let Some(total) = event.total {
                    bar.set_length(total);
                }
                bar.set_position(event.current);
                bar.set_message(event.message);
            }
        })
    };

    let run = if resume {
        let latest = sync_store
            .latest_run()?
            .context("No previous run to resume")?;
        orchestrator.resume(&latest.id, &cancel).await?
    } else {
        let kind = if incremental {
            SyncRunKind::Incremental
        } else {
            SyncRunKind::Full
        };
        orchestrator.run(kind, &cancel).await?
    };

    bar_task.abort();
    bar.finish_and_clear();

    println!("Run {} finished: {}", run.id, run.status.as_str());
    println!(
        "  tracks: {}  artists: {}  albums: {}  playlists: {}",
        run.summary.tracks_processed,
        run.summary.artists_processed,
        run.summary.albums_processed,
        run.summary.playlists_processed,
    );
    if let Some(error) = &run.error_message {
        println!("  last error: {}", error);
    }
    if run.status == SyncRunStatus::Cancelled {
        println!("  resumable with: melosync sync --resume");
    }
    Ok(())
}

fn show_status(
    ctx: FetcherContext,
    sync_store: Arc<SqliteSyncStateStore>,
    settings: OrchestratorSettings,
) -> Result<()> {
    let latest = match sync_store.latest_run()? {
        Some(run) => run,
        None => {
            println!("No sync runs recorded yet");
            return Ok(());
        }
    };

    let orchestrator =
        SyncOrchestrator::new(ctx, sync_store, ProgressSink::disabled(), settings);
    let status = orchestrator.current_status(&latest.id)?;

    println!(
        "Run {} ({}) started at {}: {}",
        status.run.id,
        status.run.kind.as_str(),
        format_timestamp(status.run.started_at),
        status.run.status.as_str()
    );
    for phase in &status.phases {
        let percent = phase
            .percent_complete
            .map(|p| format!("{:.0}%", p))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>12}: {} at offset {} ({} items, {})",
            phase.entity_type.as_str(),
            phase.status.as_str(),
            phase.current_offset,
            phase.items_processed,
            percent
        );
        if let Some(wait) = phase.rate_limit_seconds_remaining {
            println!("               rate limited, {}s until retry", wait);
        }
        if let Some(error) = &phase.last_error {
            println!("               last error: {}", error);
        }
    }
    Ok(())
}
