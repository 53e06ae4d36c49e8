//! One batch fetcher per synchronized entity type.
//!
//! Fetchers convert rate limiting and remote failures into fields of the
//! returned [`BatchOutcome`]; an `Err` from `fetch_batch` means persistence
//! failure, contract violation or cancellation, where no resume logic
//! applies at this level.

mod albums;
mod artists;
mod playlists;
mod tracks;

pub use albums::AlbumsFetcher;
pub use artists::ArtistsFetcher;
pub use playlists::PlaylistsFetcher;
pub use tracks::TracksFetcher;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::batch::BatchOutcome;
use super::progress::ProgressSink;
use super::rate_limiter::RateLimiter;
use crate::library_store::LibraryStore;
use crate::remote::MusicApi;
use crate::sync_store::EntityType;

/// Pulls and applies one batch of one entity type.
#[async_trait]
pub trait BatchFetcher: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// Fetch the page starting at `offset`, apply it to the local store and
    /// describe what happened.
    async fn fetch_batch(
        &self,
        offset: u64,
        batch_size: u64,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome>;
}

/// Collaborators shared by every fetcher of a run.
#[derive(Clone)]
pub struct FetcherContext {
    pub api: Arc<dyn MusicApi>,
    pub library: Arc<dyn LibraryStore>,
    pub limiter: Arc<RateLimiter>,
}

pub(crate) fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Absolute reset time for a 429. Without a server-provided retry-after the
/// wait defaults to the configured maximum (typically 24 hours).
pub(crate) fn rate_limit_reset_at(retry_after_secs: Option<u64>, default_wait_secs: u64) -> i64 {
    now() + retry_after_secs.unwrap_or(default_wait_secs) as i64
}
