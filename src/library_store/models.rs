//! Data models for the local library replica.

use serde::{Deserialize, Serialize};

/// A saved track. Tracks are fully known from the saved-track listing and
/// never enter an enrichment candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist_id: String,
    pub album_id: String,
    pub duration_ms: i64,
    /// Unix seconds when this row was first created.
    pub first_seen_at: i64,
    /// Unix seconds of the last write from a sync pass.
    pub last_synced_at: i64,
}

/// An artist row. May be a stub until the artist enrichment phase runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub id: String,
    pub name: String,
    /// Genre tags; empty is a valid enriched state.
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub image_url: Option<String>,
    pub first_seen_at: i64,
    pub last_synced_at: i64,
}

impl Artist {
    /// A stub is a row that was created but never visited by a detail
    /// lookup. Classification is purely by timestamp: empty genres or a
    /// missing image never count, because both are valid enriched states.
    pub fn is_stub(&self) -> bool {
        self.first_seen_at == self.last_synced_at
    }
}

/// An album row. May be a stub until the album enrichment phase runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub release_date: Option<String>,
    pub total_tracks: Option<i64>,
    pub image_url: Option<String>,
    pub first_seen_at: i64,
    pub last_synced_at: i64,
}

impl Album {
    /// See [`Artist::is_stub`].
    pub fn is_stub(&self) -> bool {
        self.first_seen_at == self.last_synced_at
    }
}

/// A playlist row. The `snapshot_id` is the remote change token: member
/// lists are only rewritten when it differs from the stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub snapshot_id: String,
    pub track_count: i64,
    pub first_seen_at: i64,
    pub last_synced_at: i64,
}

/// One saved track plus the artist/album references embedded in the remote
/// listing. Input to [`super::LibraryStore::apply_saved_tracks`].
#[derive(Debug, Clone)]
pub struct SavedTrackUpsert {
    pub id: String,
    pub title: String,
    pub duration_ms: i64,
    pub artist_id: String,
    pub artist_name: String,
    pub album_id: String,
    pub album_name: String,
}

/// Full artist fields written back by the enrichment phase.
#[derive(Debug, Clone)]
pub struct ArtistEnrichment {
    pub id: String,
    pub name: String,
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub image_url: Option<String>,
}

/// Full album fields written back by the enrichment phase.
#[derive(Debug, Clone)]
pub struct AlbumEnrichment {
    pub id: String,
    pub name: String,
    pub release_date: Option<String>,
    pub total_tracks: Option<i64>,
    pub image_url: Option<String>,
}

/// Playlist header used when (re)writing a playlist and its member list.
#[derive(Debug, Clone)]
pub struct PlaylistUpsert {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub snapshot_id: String,
}

/// Write counters returned by the batch-apply operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchWriteStats {
    pub added: u64,
    pub updated: u64,
    pub stubs_created: u64,
}

/// Row counts for status display.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LibraryCounts {
    pub tracks: u64,
    pub artists: u64,
    pub albums: u64,
    pub playlists: u64,
}
