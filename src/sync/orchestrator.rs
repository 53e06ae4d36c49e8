//! Run orchestration: drives each phase's fetcher to completion.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::batch::BatchOutcome;
use super::fetchers::{
    now, AlbumsFetcher, ArtistsFetcher, BatchFetcher, FetcherContext, PlaylistsFetcher,
    TracksFetcher,
};
use super::progress::ProgressSink;
use super::Cancelled;
use crate::sync_store::{
    Checkpoint, CheckpointStatus, EntityType, RunSummary, SyncRun, SyncRunKind, SyncRunStatus,
    SyncStateStore,
};

/// Engine-level tunables, resolved from the application config.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Page size for listing endpoints.
    pub batch_size: u64,
    /// The remote's cap on ids per batch-lookup call.
    pub detail_batch_size: u64,
    /// Enriched rows older than this become candidates again.
    pub staleness_threshold_secs: i64,
    /// Wait applied to a 429 without a retry-after.
    pub rate_limit_default_wait_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            detail_batch_size: 20,
            staleness_threshold_secs: 7 * 86_400,
            rate_limit_default_wait_secs: 24 * 3_600,
        }
    }
}

/// Read-only projection of one phase for status queries.
#[derive(Debug, Clone)]
pub struct PhaseStatus {
    pub entity_type: EntityType,
    pub status: CheckpointStatus,
    pub current_offset: u64,
    pub items_processed: u64,
    pub total_estimated: Option<u64>,
    /// `current_offset / total`, clamped to 100.
    pub percent_complete: Option<f64>,
    /// Seconds until the rate-limit window ends, when waiting one out.
    pub rate_limit_seconds_remaining: Option<i64>,
    pub last_error: Option<String>,
}

/// Read-only projection of a run and its phases.
#[derive(Debug, Clone)]
pub struct RunStatusSummary {
    pub run: SyncRun,
    pub phases: Vec<PhaseStatus>,
}

/// Drives the sequential phases of a sync run: saved tracks, then artist
/// enrichment, then album enrichment, then playlists. Persists a checkpoint
/// after every committed batch, waits out rate-limit windows at phase level
/// and records the overall run.
pub struct SyncOrchestrator {
    ctx: FetcherContext,
    sync_store: Arc<dyn SyncStateStore>,
    progress: ProgressSink,
    settings: OrchestratorSettings,
}

impl SyncOrchestrator {
    pub fn new(
        ctx: FetcherContext,
        sync_store: Arc<dyn SyncStateStore>,
        progress: ProgressSink,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ctx,
            sync_store,
            progress,
            settings,
        }
    }

    /// Start a fresh run and drive it to a terminal state. Returns the final
    /// run record; rate limiting and remote failures end up in it, only
    /// persistence failures surface as `Err`.
    pub async fn run(&self, kind: SyncRunKind, cancel: &CancellationToken) -> Result<SyncRun> {
        let run = SyncRun {
            id: Uuid::new_v4().to_string(),
            kind,
            status: SyncRunStatus::InProgress,
            started_at: now(),
            completed_at: None,
            summary: RunSummary::default(),
            error_message: None,
        };
        self.sync_store.create_run(&run)?;
        info!(run_id = %run.id, kind = kind.as_str(), "Starting sync run");

        self.drive(run, cancel).await
    }

    /// Resume an interrupted run from its persisted checkpoints. Supports
    /// runs that are still InProgress (crashed) or Cancelled; Failed phases
    /// have terminal checkpoints, so a failed run is retried by starting a
    /// new run instead.
    pub async fn resume(&self, run_id: &str, cancel: &CancellationToken) -> Result<SyncRun> {
        let run = self
            .sync_store
            .get_run(run_id)?
            .with_context(|| format!("No run with id {}", run_id))?;

        match run.status {
            SyncRunStatus::InProgress => {}
            SyncRunStatus::Cancelled => self.sync_store.reopen_run(run_id)?,
            status => {
                anyhow::bail!("Run {} has status {} and cannot be resumed", run_id, status.as_str())
            }
        }
        // The summary is rebuilt from the checkpoints as the phases run, so
        // counts persisted at cancellation must not be carried over.
        let run = SyncRun {
            status: SyncRunStatus::InProgress,
            completed_at: None,
            error_message: None,
            summary: RunSummary::default(),
            ..run
        };
        info!(run_id = %run.id, "Resuming sync run");

        self.drive(run, cancel).await
    }

    /// Aggregate the run record and each phase's checkpoint into a read-only
    /// summary. Never mutates state.
    pub fn current_status(&self, run_id: &str) -> Result<RunStatusSummary> {
        let run = self
            .sync_store
            .get_run(run_id)?
            .with_context(|| format!("No run with id {}", run_id))?;

        let phases = self
            .sync_store
            .list_checkpoints(run_id)?
            .into_iter()
            .map(|checkpoint| {
                let percent_complete = checkpoint.total_estimated.and_then(|total| {
                    if total == 0 {
                        None
                    } else {
                        Some((checkpoint.current_offset as f64 / total as f64 * 100.0).min(100.0))
                    }
                });
                let rate_limit_seconds_remaining = match checkpoint.status {
                    CheckpointStatus::RateLimited => checkpoint
                        .rate_limit_reset_at
                        .map(|reset_at| (reset_at - now()).max(0)),
                    _ => None,
                };
                PhaseStatus {
                    entity_type: checkpoint.entity_type,
                    status: checkpoint.status,
                    current_offset: checkpoint.current_offset,
                    items_processed: checkpoint.items_processed,
                    total_estimated: checkpoint.total_estimated,
                    percent_complete,
                    rate_limit_seconds_remaining,
                    last_error: checkpoint.last_error,
                }
            })
            .collect();

        Ok(RunStatusSummary { run, phases })
    }

    fn fetchers_for(&self, kind: SyncRunKind) -> Vec<Box<dyn BatchFetcher>> {
        let s = &self.settings;
        vec![
            Box::new(TracksFetcher::new(
                self.ctx.clone(),
                kind == SyncRunKind::Incremental,
                s.rate_limit_default_wait_secs,
            )),
            Box::new(ArtistsFetcher::new(
                self.ctx.clone(),
                s.staleness_threshold_secs,
                s.detail_batch_size,
                s.rate_limit_default_wait_secs,
            )),
            Box::new(AlbumsFetcher::new(
                self.ctx.clone(),
                s.staleness_threshold_secs,
                s.detail_batch_size,
                s.rate_limit_default_wait_secs,
            )),
            Box::new(PlaylistsFetcher::new(
                self.ctx.clone(),
                s.rate_limit_default_wait_secs,
            )),
        ]
    }

    async fn drive(&self, mut run: SyncRun, cancel: &CancellationToken) -> Result<SyncRun> {
        for fetcher in self.fetchers_for(run.kind) {
            match self.drive_phase(&run, fetcher.as_ref(), cancel).await {
                Ok(PhaseEnd::Completed { items_processed }) => {
                    run.summary.add(fetcher.entity_type(), items_processed);
                }
                Ok(PhaseEnd::Failed { error }) => {
                    return self.close_run(run, SyncRunStatus::Failed, Some(error));
                }
                Ok(PhaseEnd::Cancelled) => {
                    return self.close_run(run, SyncRunStatus::Cancelled, None);
                }
                Err(e) => {
                    // Persistence failure. Record what we can and propagate.
                    error!(run_id = %run.id, "Sync run hit a persistence failure: {:#}", e);
                    let _ = self.close_run(run, SyncRunStatus::Failed, Some(format!("{:#}", e)));
                    return Err(e);
                }
            }
        }

        self.close_run(run, SyncRunStatus::Success, None)
    }

    fn close_run(
        &self,
        mut run: SyncRun,
        status: SyncRunStatus,
        error: Option<String>,
    ) -> Result<SyncRun> {
        let completed_at = now();
        self.sync_store
            .finish_run(&run.id, status, &run.summary, error.as_deref(), completed_at)?;
        info!(run_id = %run.id, status = status.as_str(), "Sync run finished");
        run.status = status;
        run.completed_at = Some(completed_at);
        run.error_message = error;
        Ok(run)
    }

    async fn drive_phase(
        &self,
        run: &SyncRun,
        fetcher: &dyn BatchFetcher,
        cancel: &CancellationToken,
    ) -> Result<PhaseEnd> {
        let entity_type = fetcher.entity_type();
        let mut checkpoint = match self.sync_store.get_checkpoint(&run.id, entity_type)? {
            Some(checkpoint) => checkpoint,
            None => {
                let checkpoint = Checkpoint::new(&run.id, entity_type, now());
                self.sync_store.put_checkpoint(&checkpoint)?;
                checkpoint
            }
        };

        match checkpoint.status {
            CheckpointStatus::Success => {
                info!(run_id = %run.id, phase = entity_type.as_str(), "Phase already complete, skipping");
                return Ok(PhaseEnd::Completed {
                    items_processed: checkpoint.items_processed,
                });
            }
            CheckpointStatus::Failed => {
                // Can only happen on a hand-edited database; the run itself
                // would have been Failed and not resumable.
                return Ok(PhaseEnd::Failed {
                    error: checkpoint
                        .last_error
                        .unwrap_or_else(|| "Phase previously failed".to_string()),
                });
            }
            CheckpointStatus::InProgress | CheckpointStatus::RateLimited => {}
        }

        info!(
            run_id = %run.id,
            phase = entity_type.as_str(),
            offset = checkpoint.current_offset,
            "Starting phase"
        );

        loop {
            if checkpoint.status == CheckpointStatus::RateLimited {
                // Resumed into (or just entered) a rate-limit window.
                if let Err(e) = self.wait_for_rate_limit(&checkpoint, cancel).await {
                    if e.is::<Cancelled>() {
                        return Ok(PhaseEnd::Cancelled);
                    }
                    return Err(e);
                }
                checkpoint.status = CheckpointStatus::InProgress;
                checkpoint.rate_limit_reset_at = None;
                checkpoint.updated_at = now();
                self.sync_store.put_checkpoint(&checkpoint)?;
            }

            if cancel.is_cancelled() {
                return Ok(PhaseEnd::Cancelled);
            }

            let outcome = match fetcher
                .fetch_batch(
                    checkpoint.current_offset,
                    self.settings.batch_size,
                    &self.progress,
                    cancel,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) if e.is::<Cancelled>() => return Ok(PhaseEnd::Cancelled),
                Err(e) => return Err(e),
            };

            if outcome.rate_limited {
                warn!(
                    run_id = %run.id,
                    phase = entity_type.as_str(),
                    reset_at = ?outcome.rate_limit_reset_at,
                    "Phase rate limited"
                );
                // Offset deliberately untouched: the same batch is re-issued
                // after the wait.
                checkpoint.status = CheckpointStatus::RateLimited;
                checkpoint.rate_limit_reset_at = outcome.rate_limit_reset_at;
                checkpoint.last_error = Some("Rate limited by remote".to_string());
                checkpoint.updated_at = now();
                self.sync_store.put_checkpoint(&checkpoint)?;
                continue;
            }

            if let Some(error) = &outcome.error {
                error!(
                    run_id = %run.id,
                    phase = entity_type.as_str(),
                    offset = checkpoint.current_offset,
                    error,
                    "Phase failed"
                );
                checkpoint.status = CheckpointStatus::Failed;
                checkpoint.last_error = Some(error.clone());
                checkpoint.updated_at = now();
                self.sync_store.put_checkpoint(&checkpoint)?;
                return Ok(PhaseEnd::Failed {
                    error: error.clone(),
                });
            }

            // The fetcher committed this batch's writes before returning, so
            // advancing the checkpoint here preserves the
            // write-then-checkpoint ordering crash recovery relies on.
            self.apply_success(&mut checkpoint, &outcome);
            if !outcome.has_more {
                checkpoint.status = CheckpointStatus::Success;
                checkpoint.completed_at = Some(checkpoint.updated_at);
            }
            self.sync_store.put_checkpoint(&checkpoint)?;

            if !outcome.has_more {
                info!(
                    run_id = %run.id,
                    phase = entity_type.as_str(),
                    items = checkpoint.items_processed,
                    "Phase complete"
                );
                return Ok(PhaseEnd::Completed {
                    items_processed: checkpoint.items_processed,
                });
            }
        }
    }

    fn apply_success(&self, checkpoint: &mut Checkpoint, outcome: &BatchOutcome) {
        checkpoint.current_offset = outcome.next_offset;
        checkpoint.items_processed += outcome.items_processed;
        if outcome.total_estimated.is_some() {
            checkpoint.total_estimated = outcome.total_estimated;
        }
        checkpoint.last_error = None;
        checkpoint.rate_limit_reset_at = None;
        checkpoint.updated_at = now();
    }

    async fn wait_for_rate_limit(
        &self,
        checkpoint: &Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let reset_at = checkpoint
            .rate_limit_reset_at
            .unwrap_or_else(|| now() + self.settings.rate_limit_default_wait_secs as i64);
        let wait = (reset_at - now()).max(0) as u64;
        if wait > 0 {
            info!(
                phase = checkpoint.entity_type.as_str(),
                "Waiting {}s for rate-limit window to pass", wait
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
            }
        }
        Ok(())
    }
}

enum PhaseEnd {
    Completed { items_processed: u64 },
    Failed { error: String },
    Cancelled,
}
