//! Playlist fetcher, the collection phase.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{now, rate_limit_reset_at, BatchFetcher, FetcherContext};
use crate::library_store::PlaylistUpsert;
use crate::remote::{RemoteError, RemotePlaylist};
use crate::sync::batch::BatchOutcome;
use crate::sync::progress::ProgressSink;
use crate::sync_store::EntityType;

/// Result of a single member-list fetch and store.
enum MemberFetch {
    Stored,
    RateLimited { retry_after_secs: Option<u64> },
    Failed(String),
}

/// Pages the user's playlists and replaces member lists only when the
/// remote change token differs from the stored one. Unchanged playlists cost
/// one listing entry and zero member writes.
///
/// A rate limit mid-page returns with the offset unchanged; re-processing
/// the page is cheap because every playlist replaced before the limit now
/// matches its snapshot and is merely touched.
pub struct PlaylistsFetcher {
    ctx: FetcherContext,
    rate_limit_default_wait_secs: u64,
}

impl PlaylistsFetcher {
    pub fn new(ctx: FetcherContext, rate_limit_default_wait_secs: u64) -> Self {
        Self {
            ctx,
            rate_limit_default_wait_secs,
        }
    }

    /// Fetch and store one changed playlist's member list.
    async fn replace_members(
        &self,
        playlist: &RemotePlaylist,
        cancel: &CancellationToken,
    ) -> Result<MemberFetch> {
        self.ctx.limiter.await_slot(cancel).await?;
        let track_ids = match self.ctx.api.get_playlist_tracks(&playlist.id).await {
            Ok(track_ids) => {
                self.ctx.limiter.reset_backoff();
                track_ids
            }
            Err(RemoteError::RateLimited { retry_after_secs }) => {
                self.ctx.limiter.trigger_backoff();
                return Ok(MemberFetch::RateLimited { retry_after_secs });
            }
            Err(e) => return Ok(MemberFetch::Failed(e.to_string())),
        };

        self.ctx.library.replace_playlist(
            &PlaylistUpsert {
                id: playlist.id.clone(),
                name: playlist.name.clone(),
                owner: playlist.owner.clone(),
                snapshot_id: playlist.snapshot_id.clone(),
            },
            &track_ids,
        )?;
        Ok(MemberFetch::Stored)
    }
}

#[async_trait]
impl BatchFetcher for PlaylistsFetcher {
    fn entity_type(&self) -> EntityType {
        EntityType::Playlists
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
        let page = match self.ctx.api.list_playlists(offset, batch_size).await {
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

        let mut outcome = BatchOutcome {
            total_estimated: Some(page.total),
            ..Default::default()
        };
        for playlist in &page.items {
            let stored_snapshot = self.ctx.library.get_playlist_snapshot(&playlist.id)?;
            match stored_snapshot {
                Some(snapshot) if snapshot == playlist.snapshot_id => {
                    debug!(playlist_id = %playlist.id, "Playlist unchanged, skipping member fetch");
                    self.ctx.library.touch_playlist(&playlist.id, now())?;
                }
                stored => match self.replace_members(playlist, cancel).await? {
                    MemberFetch::Stored => {
                        if stored.is_none() {
                            outcome.new_items_added += 1;
                        } else {
                            outcome.items_updated += 1;
                        }
                    }
                    MemberFetch::Failed(error) => {
                        return Ok(BatchOutcome::failed(offset, error));
                    }
                    MemberFetch::RateLimited { retry_after_secs } => {
                        return Ok(BatchOutcome::rate_limited(
                            offset,
                            Some(rate_limit_reset_at(
                                retry_after_secs,
                                self.rate_limit_default_wait_secs,
                            )),
                        ));
                    }
                },
            }
            outcome.items_processed += 1;
        }

        let items = page.items.len() as u64;
        outcome.next_offset = offset + items;
        outcome.has_more = items > 0 && outcome.next_offset < page.total;

        progress.emit(
            EntityType::Playlists,
            outcome.next_offset,
            Some(page.total),
            format!("{} of {} playlists", outcome.next_offset, page.total),
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library_store::{LibraryStore, SqliteLibraryStore};
    use crate::sync::fetchers::testing::ScriptedApi;
    use crate::sync::rate_limiter::{RateLimiter, RateLimiterConfig};
    use std::sync::Arc;

    fn playlist(id: &str, snapshot: &str) -> RemotePlaylist {
        RemotePlaylist {
            id: id.to_string(),
            name: format!("Playlist {}", id),
            owner: Some("me".to_string()),
            snapshot_id: snapshot.to_string(),
            track_count: 2,
        }
    }

    fn fetcher(api: ScriptedApi) -> (PlaylistsFetcher, Arc<SqliteLibraryStore>, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        let library = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let ctx = FetcherContext {
            api: api.clone(),
            library: library.clone(),
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        };
        (PlaylistsFetcher::new(ctx, 86_400), library, api)
    }

    #[tokio::test]
    async fn test_new_playlist_gets_members_fetched() {
        let api = ScriptedApi {
            playlists: vec![playlist("pl1", "snap-1")],
            playlist_tracks: [("pl1".to_string(), vec!["t1".to_string(), "t2".to_string()])]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let (fetcher, library, _) = fetcher(api);

        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.new_items_added, 1);
        assert_eq!(outcome.items_processed, 1);
        assert!(!outcome.has_more);

        assert_eq!(
            library.get_playlist_tracks("pl1").unwrap(),
            vec!["t1".to_string(), "t2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_skips_member_fetch() {
        let api = ScriptedApi {
            playlists: vec![playlist("pl1", "snap-1")],
            playlist_tracks: [("pl1".to_string(), vec!["t1".to_string()])]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let (fetcher, _, api) = fetcher(api);
        let progress = ProgressSink::disabled();
        let cancel = CancellationToken::new();

        fetcher.fetch_batch(0, 50, &progress, &cancel).await.unwrap();
        let calls_after_first = api.calls();

        let outcome = fetcher.fetch_batch(0, 50, &progress, &cancel).await.unwrap();
        assert_eq!(outcome.new_items_added, 0);
        assert_eq!(outcome.items_updated, 0);
        assert_eq!(outcome.items_processed, 1);
        // Only the listing call, no member fetch.
        assert_eq!(api.calls(), calls_after_first + 1);
    }

    #[tokio::test]
    async fn test_changed_snapshot_replaces_members() {
        let api = ScriptedApi {
            playlists: vec![playlist("pl1", "snap-1")],
            playlist_tracks: [("pl1".to_string(), vec!["t1".to_string()])]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let (fetcher, library, _) = fetcher(api);
        let progress = ProgressSink::disabled();
        let cancel = CancellationToken::new();
        fetcher.fetch_batch(0, 50, &progress, &cancel).await.unwrap();

        // Same playlist, new snapshot and members.
        let api = ScriptedApi {
            playlists: vec![playlist("pl1", "snap-2")],
            playlist_tracks: [("pl1".to_string(), vec!["t9".to_string()])]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let ctx = FetcherContext {
            api: Arc::new(api),
            library: library.clone(),
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        };
        let fetcher = PlaylistsFetcher::new(ctx, 86_400);
        let outcome = fetcher.fetch_batch(0, 50, &progress, &cancel).await.unwrap();

        assert_eq!(outcome.items_updated, 1);
        assert_eq!(library.get_playlist_tracks("pl1").unwrap(), vec!["t9".to_string()]);
        assert_eq!(
            library.get_playlist_snapshot("pl1").unwrap().as_deref(),
            Some("snap-2")
        );
    }

    // Paused time so the armed backoff window is slept out instantly.
    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_during_member_fetch_does_not_advance() {
        let api = ScriptedApi {
            playlists: vec![playlist("pl1", "snap-1")],
            playlist_tracks: [("pl1".to_string(), vec!["t1".to_string()])]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        // Listing succeeds, the member fetch hits the limit.
        api.inject_ok();
        api.inject_error(RemoteError::RateLimited {
            retry_after_secs: Some(5),
        });
        let (fetcher, library, _) = fetcher(api);

        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.rate_limited);
        assert_eq!(outcome.next_offset, 0);
        assert!(library.get_playlist("pl1").unwrap().is_none());

        // The retry re-processes the same page successfully.
        let outcome = fetcher
            .fetch_batch(0, 50, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(library.get_playlist_tracks("pl1").unwrap(), vec!["t1".to_string()]);
    }
}
