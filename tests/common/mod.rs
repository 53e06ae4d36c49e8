//! Common test infrastructure
//!
//! Provides an in-memory fake of the remote music library API and a harness
//! wiring it to in-memory stores and an orchestrator. Tests should only
//! import from this module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use melosync::library_store::SqliteLibraryStore;
use melosync::remote::{
    AlbumDetails, ArtistDetails, MusicApi, Page, RemoteError, RemotePlaylist, RemoteResult,
    SavedTrack,
};
use melosync::sync::fetchers::FetcherContext;
use melosync::sync::{OrchestratorSettings, ProgressSink, RateLimiterConfig, SyncOrchestrator};
use melosync::sync::RateLimiter;
use melosync::sync_store::SqliteSyncStateStore;

/// In-memory remote library. Every call consumes one entry of the script
/// FIFO: `Some(error)` fails that call, `None` lets it through, an exhausted
/// script always lets calls through. Collections can be mutated between runs
/// to simulate remote-side changes.
#[derive(Default)]
pub struct FakeRemote {
    saved_tracks: Mutex<Vec<SavedTrack>>,
    artists: Mutex<HashMap<String, ArtistDetails>>,
    albums: Mutex<HashMap<String, AlbumDetails>>,
    playlists: Mutex<Vec<RemotePlaylist>>,
    playlist_tracks: Mutex<HashMap<String, Vec<String>>>,
    script: Mutex<Vec<Option<RemoteError>>>,
    calls: AtomicU64,
}

impl FakeRemote {
    /// Register a saved track along with the artist and album details the
    /// enrichment phases will look up.
    pub fn add_track(&self, id: &str, artist_id: &str, album_id: &str) {
        self.saved_tracks.lock().unwrap().push(SavedTrack {
            id: id.to_string(),
            title: format!("Track {}", id),
            duration_ms: 180_000,
            artist_id: artist_id.to_string(),
            artist_name: format!("Artist {}", artist_id),
            album_id: album_id.to_string(),
            album_name: format!("Album {}", album_id),
        });
        self.artists.lock().unwrap().insert(
            artist_id.to_string(),
            ArtistDetails {
                id: artist_id.to_string(),
                name: format!("Artist {}", artist_id),
                genres: vec!["electronic".to_string()],
                popularity: Some(50),
                image_url: None,
            },
        );
        self.albums.lock().unwrap().insert(
            album_id.to_string(),
            AlbumDetails {
                id: album_id.to_string(),
                name: format!("Album {}", album_id),
                release_date: Some("2020-01-01".to_string()),
                total_tracks: Some(10),
                image_url: None,
            },
        );
    }

    /// Add or replace a playlist and its member tracks.
    pub fn set_playlist(&self, id: &str, snapshot_id: &str, track_ids: &[&str]) {
        let playlist = RemotePlaylist {
            id: id.to_string(),
            name: format!("Playlist {}", id),
            owner: Some("listener".to_string()),
            snapshot_id: snapshot_id.to_string(),
            track_count: track_ids.len() as u64,
        };
        let mut playlists = self.playlists.lock().unwrap();
        match playlists.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = playlist,
            None => playlists.push(playlist),
        }
        self.playlist_tracks.lock().unwrap().insert(
            id.to_string(),
            track_ids.iter().map(|t| t.to_string()).collect(),
        );
    }

    /// Fail the next unscripted call with `error`.
    pub fn inject_error(&self, error: RemoteError) {
        self.script.lock().unwrap().push(Some(error));
    }

    /// Let the next unscripted call through, used to position a later
    /// injected error.
    pub fn inject_ok(&self) {
        self.script.lock().unwrap().push(None);
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok(());
        }
        match script.remove(0) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MusicApi for FakeRemote {
    async fn list_saved_tracks(&self, offset: u64, limit: u64) -> RemoteResult<Page<SavedTrack>> {
        self.record_call()?;
        let saved_tracks = self.saved_tracks.lock().unwrap();
        let items = saved_tracks
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(Page {
            items,
            total: saved_tracks.len() as u64,
            offset,
        })
    }

    async fn get_several_artists(&self, ids: &[String]) -> RemoteResult<Vec<ArtistDetails>> {
        self.record_call()?;
        let artists = self.artists.lock().unwrap();
        Ok(ids.iter().filter_map(|id| artists.get(id).cloned()).collect())
    }

    async fn get_several_albums(&self, ids: &[String]) -> RemoteResult<Vec<AlbumDetails>> {
        self.record_call()?;
        let albums = self.albums.lock().unwrap();
        Ok(ids.iter().filter_map(|id| albums.get(id).cloned()).collect())
    }

    async fn list_playlists(&self, offset: u64, limit: u64) -> RemoteResult<Page<RemotePlaylist>> {
        self.record_call()?;
        let playlists = self.playlists.lock().unwrap();
        let items = playlists
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(Page {
            items,
            total: playlists.len() as u64,
            offset,
        })
    }

    async fn get_playlist_tracks(&self, id: &str) -> RemoteResult<Vec<String>> {
        self.record_call()?;
        Ok(self
            .playlist_tracks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A remote with `track_count` saved tracks spread over a handful of artists
/// and albums.
pub fn remote_with_tracks(track_count: usize) -> FakeRemote {
    let remote = FakeRemote::default();
    for i in 0..track_count {
        remote.add_track(
            &format!("track-{:03}", i),
            &format!("artist-{}", i % 7),
            &format!("album-{}", i % 11),
        );
    }
    remote
}

pub struct TestHarness {
    pub remote: Arc<FakeRemote>,
    pub library: Arc<SqliteLibraryStore>,
    pub sync_store: Arc<SqliteSyncStateStore>,
    pub orchestrator: SyncOrchestrator,
}

impl TestHarness {
    pub fn new(remote: FakeRemote) -> Self {
        let remote = Arc::new(remote);
        let library = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let sync_store = Arc::new(SqliteSyncStateStore::in_memory().unwrap());
        let ctx = FetcherContext {
            api: remote.clone(),
            library: library.clone(),
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        };
        let orchestrator = SyncOrchestrator::new(
            ctx,
            sync_store.clone(),
            ProgressSink::disabled(),
            OrchestratorSettings::default(),
        );
        Self {
            remote,
            library,
            sync_store,
            orchestrator,
        }
    }
}
