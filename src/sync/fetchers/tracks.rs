//! Saved-track fetcher, the primary phase.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{rate_limit_reset_at, BatchFetcher, FetcherContext};
use crate::library_store::SavedTrackUpsert;
use crate::remote::RemoteError;
use crate::sync::batch::BatchOutcome;
use crate::sync::progress::ProgressSink;
use crate::sync_store::EntityType;

/// Pages the user's saved tracks in the remote API's native order. Each page
/// upserts its tracks and creates stub rows for referenced artists and
/// albums the library does not know yet; those stubs feed the enrichment
/// phases.
pub struct TracksFetcher {
    ctx: FetcherContext,
    /// Stop paging once a page adds no new tracks. Set for incremental runs,
    /// where the newest saved tracks come first.
    stop_when_no_new: bool,
    rate_limit_default_wait_secs: u64,
}

impl TracksFetcher {
    pub fn new(
        ctx: FetcherContext,
        stop_when_no_new: bool,
        rate_limit_default_wait_secs: u64,
    ) -> Self {
        Self {
            ctx,
            stop_when_no_new,
            rate_limit_default_wait_secs,
        }
    }
}

#[async_trait]
impl BatchFetcher for TracksFetcher {
    fn entity_type(&self) -> EntityType {
        EntityType::SavedTracks
    }

    async fn fetch_batch(
        &self,
        offset: u64,
        batch_size: u64,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        ensure!(batch_size > 0, "batch_size must be positive");

        self.ctx.limiter.await_slot(cancel).await?;
        let page = match self.ctx.api.list_saved_tracks(offset, batch_size).await {
            Ok(page) => {
                self.ctx.limiter.reset_backoff();
                page
            }
            Err(RemoteError::RateLimited { retry_after_secs }) => {
                self.ctx.limiter.trigger_backoff();
                return Ok(BatchOutcome::rate_limited(
                    offset,
                    Some(rate_limit_reset_at(
                        retry_after_secs,
                        self.rate_limit_default_wait_secs,
                    )),
                ));
            }
            Err(e) => return Ok(BatchOutcome::failed(offset, e.to_string())),
        };

        let upserts: Vec<SavedTrackUpsert> = page
            .items
            .iter()
            .map(|track| SavedTrackUpsert {
                id: track.id.clone(),
                title: track.title.clone(),
                duration_ms: track.duration_ms,
                artist_id: track.artist_id.clone(),
                artist_name: track.artist_name.clone(),
                album_id: track.album_id.clone(),
                album_name: track.album_name.clone(),
            })
            .collect();
        let stats = self.ctx.library.apply_saved_tracks(&upserts)?;

        let items = page.items.len() as u64;
        let next_offset = offset + items;
        let mut has_more = items > 0 && next_offset < page.total;
        if self.stop_when_no_new && items > 0 && stats.added == 0 {
            debug!(offset, "Page added no new saved tracks, stopping early");
            has_more = false;
        }

        progress.emit(
            EntityType::SavedTracks,
            next_offset,
            Some(page.total),
            format!("{} of {} saved tracks", next_offset, page.total),
        );

        Ok(BatchOutcome {
            items_processed: items,
            new_items_added: stats.added,
            items_updated: stats.updated,
            has_more,
            next_offset,
            total_estimated: Some(page.total),
            ..Default::default()
        })
    }
}
