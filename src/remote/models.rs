//! Wire models for the remote music library API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One page of a listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages, as reported by the remote.
    pub total: u64,
    pub offset: u64,
}

/// One entry of the saved-track listing. Carries enough about the artist and
/// album to create stub rows locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedTrack {
    pub id: String,
    pub title: String,
    pub duration_ms: i64,
    pub artist_id: String,
    pub artist_name: String,
    pub album_id: String,
    pub album_name: String,
}

/// Full artist details from the batch-lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistDetails {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub image_url: Option<String>,
}

/// Full album details from the batch-lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumDetails {
    pub id: String,
    pub name: String,
    pub release_date: Option<String>,
    pub total_tracks: Option<i64>,
    pub image_url: Option<String>,
}

/// One entry of the playlist listing. `snapshot_id` changes whenever the
/// playlist's contents change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePlaylist {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub snapshot_id: String,
    pub track_count: u64,
}

/// Failure modes of remote calls.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP 429. Expected during large syncs, not an error condition; the
    /// caller waits and retries the same offset.
    #[error("Rate limited by remote (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network failure or 5xx that survived the client's bounded retries.
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Non-retryable response, e.g. 4xx or a malformed body.
    #[error("Remote request failed: {0}")]
    Permanent(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The remote music library surface the sync engine consumes.
#[async_trait]
pub trait MusicApi: Send + Sync {
    /// Page through the user's saved tracks.
    async fn list_saved_tracks(&self, offset: u64, limit: u64) -> RemoteResult<Page<SavedTrack>>;

    /// Batch-lookup full artist details.
    async fn get_several_artists(&self, ids: &[String]) -> RemoteResult<Vec<ArtistDetails>>;

    /// Batch-lookup full album details.
    async fn get_several_albums(&self, ids: &[String]) -> RemoteResult<Vec<AlbumDetails>>;

    /// Page through the user's playlists.
    async fn list_playlists(&self, offset: u64, limit: u64) -> RemoteResult<Page<RemotePlaylist>>;

    /// Full ordered track-id list of one playlist.
    async fn get_playlist_tracks(&self, id: &str) -> RemoteResult<Vec<String>>;
}
