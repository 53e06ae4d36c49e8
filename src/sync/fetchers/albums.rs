//! Album enrichment fetcher.

use std::collections::HashSet;

use anyhow::{ensure, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{now, rate_limit_reset_at, BatchFetcher, FetcherContext};
use crate::library_store::AlbumEnrichment;
use crate::remote::RemoteError;
use crate::sync::batch::BatchOutcome;
use crate::sync::progress::ProgressSink;
use crate::sync_store::EntityType;

/// Album counterpart of [`super::ArtistsFetcher`]: drains the local set of
/// stub and stale albums through the remote's batch-lookup endpoint.
pub struct AlbumsFetcher {
    ctx: FetcherContext,
    staleness_threshold_secs: i64,
    detail_batch_size: u64,
    rate_limit_default_wait_secs: u64,
}

impl AlbumsFetcher {
    pub fn new(
        ctx: FetcherContext,
        staleness_threshold_secs: i64,
        detail_batch_size: u64,
        rate_limit_default_wait_secs: u64,
    ) -> Self {
        Self {
            ctx,
            staleness_threshold_secs,
            detail_batch_size,
            rate_limit_default_wait_secs,
        }
    }
}

#[async_trait]
impl BatchFetcher for AlbumsFetcher {
    fn entity_type(&self) -> EntityType {
        EntityType::Albums
    }

    async fn fetch_batch(
        &self,
        offset: u64,
        batch_size: u64,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        ensure!(batch_size > 0, "batch_size must be positive");

        let stale_before = now() - self.staleness_threshold_secs;
        let total_before = self
            .ctx
            .library
            .count_album_enrichment_candidates(stale_before)?;
        if total_before == 0 {
            return Ok(BatchOutcome {
                next_offset: offset,
                total_estimated: Some(0),
                ..Default::default()
            });
        }

        let mut outcome = BatchOutcome {
            total_estimated: Some(total_before),
            ..Default::default()
        };
        while outcome.items_processed < batch_size {
            let limit = self
                .detail_batch_size
                .min(batch_size - outcome.items_processed);
            let candidates = self
                .ctx
                .library
                .album_enrichment_candidates(stale_before, limit)?;
            if candidates.is_empty() {
                break;
            }

            self.ctx.limiter.await_slot(cancel).await?;
            let details = match self.ctx.api.get_several_albums(&candidates).await {
                Ok(details) => {
                    self.ctx.limiter.reset_backoff();
                    details
                }
                Err(RemoteError::RateLimited { retry_after_secs }) => {
                    self.ctx.limiter.trigger_backoff();
                    if outcome.items_processed == 0 {
                        return Ok(BatchOutcome::rate_limited(
                            offset,
                            Some(rate_limit_reset_at(
                                retry_after_secs,
                                self.rate_limit_default_wait_secs,
                            )),
                        ));
                    }
                    break;
                }
                Err(e) => return Ok(BatchOutcome::failed(offset, e.to_string())),
            };

            let enrichments: Vec<AlbumEnrichment> = details
                .into_iter()
                .map(|album| AlbumEnrichment {
                    id: album.id,
                    name: album.name,
                    release_date: album.release_date,
                    total_tracks: album.total_tracks,
                    image_url: album.image_url,
                })
                .collect();
            let stats = self.ctx.library.apply_album_enrichment(&enrichments)?;

            // Unknown ids must leave the head of the set, as for artists.
            let known: HashSet<&str> =
                enrichments.iter().map(|album| album.id.as_str()).collect();
            let unknown: Vec<String> = candidates
                .iter()
                .filter(|id| !known.contains(id.as_str()))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                self.ctx.library.touch_albums(&unknown)?;
            }

            outcome.items_processed += candidates.len() as u64;
            outcome.items_updated += stats.updated;
        }

        outcome.next_offset = offset + outcome.items_processed;
        let remaining = self
            .ctx
            .library
            .count_album_enrichment_candidates(stale_before)?;
        outcome.has_more = remaining > 0;

        progress.emit(
            EntityType::Albums,
            outcome.next_offset,
            Some(outcome.next_offset + remaining),
            format!("Enriched {} albums, {} to go", outcome.next_offset, remaining),
        );

        Ok(outcome)
    }
}
