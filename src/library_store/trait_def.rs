//! LibraryStore trait definition.

use anyhow::Result;

use super::models::{
    Album, AlbumEnrichment, Artist, ArtistEnrichment, BatchWriteStats, LibraryCounts, Playlist,
    PlaylistUpsert, SavedTrackUpsert, Track,
};

/// Storage backend for the local library replica.
///
/// All batch-apply operations are transactional: either every row of the
/// batch is visible afterwards or none is.
pub trait LibraryStore: Send + Sync {
    // =========================================================================
    // Saved tracks
    // =========================================================================

    /// Apply one page of saved tracks in a single transaction.
    ///
    /// Tracks are inserted or updated. Referenced artists and albums that are
    /// not yet present are created as stubs (`first_seen_at == last_synced_at`);
    /// already-present ones are left untouched, whether stub or enriched.
    fn apply_saved_tracks(&self, tracks: &[SavedTrackUpsert]) -> Result<BatchWriteStats>;

    fn get_track(&self, id: &str) -> Result<Option<Track>>;

    // =========================================================================
    // Artist enrichment
    // =========================================================================

    /// IDs of artists that are stubs or whose last sync is older than
    /// `stale_before`, ordered by `first_seen_at` then id.
    fn artist_enrichment_candidates(&self, stale_before: i64, limit: u64) -> Result<Vec<String>>;

    fn count_artist_enrichment_candidates(&self, stale_before: i64) -> Result<u64>;

    /// Write full artist details for one batch in a single transaction. Every
    /// touched row leaves the stub state.
    fn apply_artist_enrichment(&self, artists: &[ArtistEnrichment]) -> Result<BatchWriteStats>;

    /// Bump `last_synced_at` for artists the remote returned nothing for, so
    /// an attempted lookup removes them from the candidate set until they go
    /// stale again.
    fn touch_artists(&self, ids: &[String]) -> Result<()>;

    fn get_artist(&self, id: &str) -> Result<Option<Artist>>;

    // =========================================================================
    // Album enrichment
    // =========================================================================

    fn album_enrichment_candidates(&self, stale_before: i64, limit: u64) -> Result<Vec<String>>;

    fn count_album_enrichment_candidates(&self, stale_before: i64) -> Result<u64>;

    fn apply_album_enrichment(&self, albums: &[AlbumEnrichment]) -> Result<BatchWriteStats>;

    /// See [`LibraryStore::touch_artists`].
    fn touch_albums(&self, ids: &[String]) -> Result<()>;

    fn get_album(&self, id: &str) -> Result<Option<Album>>;

    // =========================================================================
    // Playlists
    // =========================================================================

    fn get_playlist(&self, id: &str) -> Result<Option<Playlist>>;

    /// Stored change token for a playlist, if the playlist is known.
    fn get_playlist_snapshot(&self, id: &str) -> Result<Option<String>>;

    /// Replace a playlist's header and full member list in one transaction.
    fn replace_playlist(&self, playlist: &PlaylistUpsert, track_ids: &[String]) -> Result<()>;

    /// Bump a playlist's `last_synced_at` without touching its members. Used
    /// when the remote change token matches the stored one.
    fn touch_playlist(&self, id: &str, now: i64) -> Result<()>;

    fn get_playlist_tracks(&self, id: &str) -> Result<Vec<String>>;

    // =========================================================================
    // Counts
    // =========================================================================

    fn counts(&self) -> Result<LibraryCounts>;
}
