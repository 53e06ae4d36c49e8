//! Artist enrichment fetcher.

use std::collections::HashSet;

use anyhow::{ensure, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{now, rate_limit_reset_at, BatchFetcher, FetcherContext};
use crate::library_store::ArtistEnrichment;
use crate::remote::RemoteError;
use crate::sync::batch::BatchOutcome;
use crate::sync::progress::ProgressSink;
use crate::sync_store::EntityType;

/// Converges artist stubs (and stale artists) into fully-enriched rows.
///
/// Unlike the saved-track phase this paginates over the local candidate set,
/// not the remote API: each batch repeatedly takes the current head of the
/// set in sub-batches of the remote's lookup cap and writes the details
/// back. Every attempted candidate leaves the set, enriched or not, so the
/// head always makes progress. The offset is therefore a cumulative progress
/// counter, not a position in a stable listing.
pub struct ArtistsFetcher {
    ctx: FetcherContext,
    staleness_threshold_secs: i64,
    /// The remote's own cap on ids per batch-lookup call.
    detail_batch_size: u64,
    rate_limit_default_wait_secs: u64,
}

impl ArtistsFetcher {
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
impl BatchFetcher for ArtistsFetcher {
    fn entity_type(&self) -> EntityType {
        EntityType::Artists
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
            .count_artist_enrichment_candidates(stale_before)?;
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
                .artist_enrichment_candidates(stale_before, limit)?;
            if candidates.is_empty() {
                break;
            }

            self.ctx.limiter.await_slot(cancel).await?;
            let details = match self.ctx.api.get_several_artists(&candidates).await {
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
                    // Sub-batches committed before the limit hit are kept;
                    // the next batch reports the rate limit from its start.
                    break;
                }
                Err(e) => return Ok(BatchOutcome::failed(offset, e.to_string())),
            };

            let enrichments: Vec<ArtistEnrichment> = details
                .into_iter()
                .map(|artist| ArtistEnrichment {
                    id: artist.id,
                    name: artist.name,
                    genres: artist.genres,
                    popularity: artist.popularity,
                    image_url: artist.image_url,
                })
                .collect();
            let stats = self.ctx.library.apply_artist_enrichment(&enrichments)?;

            // Ids the remote returned nothing for would otherwise sit at the
            // head of the set forever, starving the candidates behind them.
            let known: HashSet<&str> =
                enrichments.iter().map(|artist| artist.id.as_str()).collect();
            let unknown: Vec<String> = candidates
                .iter()
                .filter(|id| !known.contains(id.as_str()))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                self.ctx.library.touch_artists(&unknown)?;
            }

            outcome.items_processed += candidates.len() as u64;
            outcome.items_updated += stats.updated;
        }

        outcome.next_offset = offset + outcome.items_processed;
        let remaining = self
            .ctx
            .library
            .count_artist_enrichment_candidates(stale_before)?;
        outcome.has_more = remaining > 0;

        progress.emit(
            EntityType::Artists,
            outcome.next_offset,
            Some(outcome.next_offset + remaining),
            format!("Enriched {} artists, {} to go", outcome.next_offset, remaining),
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library_store::{LibraryStore, SavedTrackUpsert, SqliteLibraryStore};
    use crate::sync::fetchers::testing::ScriptedApi;
    use crate::sync::rate_limiter::{RateLimiter, RateLimiterConfig};
    use std::sync::Arc;

    const WEEK_SECS: i64 = 7 * 86_400;

    fn seed_stubs(library: &SqliteLibraryStore, artist_ids: &[&str]) {
        let upserts: Vec<SavedTrackUpsert> = artist_ids
            .iter()
            .enumerate()
            .map(|(i, artist_id)| SavedTrackUpsert {
                id: format!("t{}", i),
                title: format!("Track {}", i),
                duration_ms: 180_000,
                artist_id: artist_id.to_string(),
                artist_name: format!("Artist {}", artist_id),
                album_id: "b1".to_string(),
                album_name: "Album b1".to_string(),
            })
            .collect();
        library.apply_saved_tracks(&upserts).unwrap();
    }

    fn fetcher(
        api: ScriptedApi,
        detail_batch_size: u64,
    ) -> (ArtistsFetcher, Arc<SqliteLibraryStore>, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        let library = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let ctx = FetcherContext {
            api: api.clone(),
            library: library.clone(),
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        };
        (
            ArtistsFetcher::new(ctx, WEEK_SECS, detail_batch_size, 86_400),
            library,
            api,
        )
    }

    #[tokio::test]
    async fn test_enriches_stubs_from_candidate_set() {
        let api = ScriptedApi {
            artists: [("a1", ScriptedApi::artist_details("a1")), ("a2", ScriptedApi::artist_details("a2"))]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            ..Default::default()
        };
        let (fetcher, library, _) = fetcher(api, 20);
        seed_stubs(&library, &["a1", "a2"]);

        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.items_processed, 2);
        assert_eq!(outcome.items_updated, 2);
        assert_eq!(outcome.total_estimated, Some(2));
        assert!(!outcome.has_more);

        let artist = library.get_artist("a1").unwrap().unwrap();
        assert!(!artist.is_stub());
        assert_eq!(artist.genres, vec!["electronic".to_string()]);
    }

    #[tokio::test]
    async fn test_sub_batches_candidates_to_detail_lookup_cap() {
        let api = ScriptedApi {
            artists: (0..5)
                .map(|i| (format!("a{}", i), ScriptedApi::artist_details(&format!("a{}", i))))
                .collect(),
            ..Default::default()
        };
        let (fetcher, library, api) = fetcher(api, 2);
        seed_stubs(&library, &["a0", "a1", "a2", "a3", "a4"]);

        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        // Five candidates at a cap of two ids per lookup call.
        assert_eq!(outcome.items_processed, 5);
        assert_eq!(outcome.next_offset, 5);
        assert!(!outcome.has_more);
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_a_single_batch() {
        let api = ScriptedApi {
            artists: (0..5)
                .map(|i| (format!("a{}", i), ScriptedApi::artist_details(&format!("a{}", i))))
                .collect(),
            ..Default::default()
        };
        let (fetcher, library, _) = fetcher(api, 2);
        seed_stubs(&library, &["a0", "a1", "a2", "a3", "a4"]);

        let outcome = fetcher
            .fetch_batch(0, 2, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.items_processed, 2);
        assert!(outcome.has_more);
    }

    #[tokio::test]
    async fn test_empty_candidate_set_completes_immediately() {
        let (fetcher, _, _) = fetcher(ScriptedApi::default(), 20);

        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(!outcome.has_more);
        assert_eq!(outcome.items_processed, 0);
        assert_eq!(outcome.total_estimated, Some(0));
    }

    #[tokio::test]
    async fn test_rate_limit_keeps_candidates_untouched() {
        let api = ScriptedApi::default();
        api.inject_error(RemoteError::RateLimited { retry_after_secs: None });
        let (fetcher, library, _) = fetcher(api, 20);
        seed_stubs(&library, &["a1"]);

        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.rate_limited);
        assert_eq!(outcome.next_offset, 0);
        assert!(library.get_artist("a1").unwrap().unwrap().is_stub());
    }

    #[tokio::test]
    async fn test_unknown_candidates_leave_the_set_after_one_attempt() {
        // Remote knows none of the stubbed artists.
        let (fetcher, library, api) = fetcher(ScriptedApi::default(), 20);
        seed_stubs(&library, &["a1"]);
        let progress = ProgressSink::disabled();
        let cancel = CancellationToken::new();

        let outcome = fetcher.fetch_batch(0, 50, &progress, &cancel).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.items_processed, 1);
        assert_eq!(outcome.items_updated, 0);
        assert!(!outcome.has_more);

        // The attempt is recorded, no second lookup for the same id.
        let calls = api.calls();
        let outcome = fetcher.fetch_batch(1, 50, &progress, &cancel).await.unwrap();
        assert_eq!(outcome.items_processed, 0);
        assert_eq!(api.calls(), calls);
    }

    #[tokio::test]
    async fn test_unknown_ids_at_head_do_not_starve_candidates_behind_them() {
        // a1 and a2 are unknown to the remote and sort before a3, which is
        // the only enrichable candidate. With a lookup cap of two the first
        // sub-batch writes nothing, yet a3 must still be reached.
        let api = ScriptedApi {
            artists: [("a3".to_string(), ScriptedApi::artist_details("a3"))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let (fetcher, library, _) = fetcher(api, 2);
        seed_stubs(&library, &["a1", "a2", "a3"]);

        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.items_processed, 3);
        assert_eq!(outcome.items_updated, 1);
        assert!(!outcome.has_more);
        assert!(!library.get_artist("a3").unwrap().unwrap().is_stub());
        assert_eq!(
            library.get_artist("a3").unwrap().unwrap().genres,
            vec!["electronic".to_string()]
        );
    }

    // Paused time so the armed backoff window is slept out instantly.
    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_mid_batch_keeps_committed_sub_batches() {
        let api = ScriptedApi {
            artists: (0..4)
                .map(|i| (format!("a{}", i), ScriptedApi::artist_details(&format!("a{}", i))))
                .collect(),
            ..Default::default()
        };
        // First lookup succeeds, the second hits the limit.
        api.inject_ok();
        api.inject_error(RemoteError::RateLimited { retry_after_secs: Some(30) });
        let (fetcher, library, _) = fetcher(api, 2);
        seed_stubs(&library, &["a0", "a1", "a2", "a3"]);
        let progress = ProgressSink::disabled();
        let cancel = CancellationToken::new();

        let outcome = fetcher.fetch_batch(0, 50, &progress, &cancel).await.unwrap();
        assert!(!outcome.rate_limited);
        assert_eq!(outcome.items_processed, 2);
        assert_eq!(outcome.next_offset, 2);
        assert!(outcome.has_more);
        assert!(!library.get_artist("a0").unwrap().unwrap().is_stub());
        assert!(library.get_artist("a2").unwrap().unwrap().is_stub());

        // The follow-up batch picks up the remaining candidates.
        let outcome = fetcher.fetch_batch(2, 50, &progress, &cancel).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.items_processed, 2);
        assert!(!outcome.has_more);
    }
}
