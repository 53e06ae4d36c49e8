//! SQLite-backed library storage.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use super::models::*;
use super::schema::LIBRARY_VERSIONED_SCHEMAS;
use super::trait_def::LibraryStore;
use crate::sqlite_persistence::open_versioned;

/// SQLite-backed library store.
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLibraryStore {
    /// Open an existing library database or create a new one with the
    /// current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(&db_path).with_context(|| {
            format!("Failed to open library database at {:?}", db_path.as_ref())
        })?;
        open_versioned(&conn, LIBRARY_VERSIONED_SCHEMAS, "library")?;

        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, LIBRARY_VERSIONED_SCHEMAS, "library")?;

        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
        Ok(Track {
            id: row.get("id")?,
            title: row.get("title")?,
            artist_id: row.get("artist_id")?,
            album_id: row.get("album_id")?,
            duration_ms: row.get("duration_ms")?,
            first_seen_at: row.get("first_seen_at")?,
            last_synced_at: row.get("last_synced_at")?,
        })
    }

    fn row_to_artist(row: &rusqlite::Row) -> rusqlite::Result<Artist> {
        Ok(Artist {
            id: row.get("id")?,
            name: row.get("name")?,
            genres: serde_json::from_str(&row.get::<_, String>("genres")?).unwrap_or_default(),
            popularity: row.get("popularity")?,
            image_url: row.get("image_url")?,
            first_seen_at: row.get("first_seen_at")?,
            last_synced_at: row.get("last_synced_at")?,
        })
    }

    fn row_to_album(row: &rusqlite::Row) -> rusqlite::Result<Album> {
        Ok(Album {
            id: row.get("id")?,
            name: row.get("name")?,
            artist_id: row.get("artist_id")?,
            release_date: row.get("release_date")?,
            total_tracks: row.get("total_tracks")?,
            image_url: row.get("image_url")?,
            first_seen_at: row.get("first_seen_at")?,
            last_synced_at: row.get("last_synced_at")?,
        })
    }

    fn row_to_playlist(row: &rusqlite::Row) -> rusqlite::Result<Playlist> {
        Ok(Playlist {
            id: row.get("id")?,
            name: row.get("name")?,
            owner: row.get("owner")?,
            snapshot_id: row.get("snapshot_id")?,
            track_count: row.get("track_count")?,
            first_seen_at: row.get("first_seen_at")?,
            last_synced_at: row.get("last_synced_at")?,
        })
    }

    /// Get current timestamp in seconds.
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }
}

impl LibraryStore for SqliteLibraryStore {
    fn apply_saved_tracks(&self, tracks: &[SavedTrackUpsert]) -> Result<BatchWriteStats> {
        let mut stats = BatchWriteStats::default();
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for track in tracks {
            // Referenced artists and albums only ever get stub rows here;
            // existing rows are never touched so enrichment is not undone.
            let inserted = tx.execute(
                r#"INSERT OR IGNORE INTO artists (id, name, genres, first_seen_at, last_synced_at)
                   VALUES (?1, ?2, '[]', ?3, ?3)"#,
                rusqlite::params![track.artist_id, track.artist_name, now],
            )?;
            stats.stubs_created += inserted as u64;

            let inserted = tx.execute(
                r#"INSERT OR IGNORE INTO albums (id, name, artist_id, first_seen_at, last_synced_at)
                   VALUES (?1, ?2, ?3, ?4, ?4)"#,
                rusqlite::params![track.album_id, track.album_name, track.artist_id, now],
            )?;
            stats.stubs_created += inserted as u64;

            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM tracks WHERE id = ?1",
                    [&track.id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);

            if exists {
                tx.execute(
                    r#"UPDATE tracks
                       SET title = ?2, artist_id = ?3, album_id = ?4, duration_ms = ?5,
                           last_synced_at = ?6
                       WHERE id = ?1"#,
                    rusqlite::params![
                        track.id,
                        track.title,
                        track.artist_id,
                        track.album_id,
                        track.duration_ms,
                        now,
                    ],
                )?;
                stats.updated += 1;
            } else {
                tx.execute(
                    r#"INSERT INTO tracks (
                        id, title, artist_id, album_id, duration_ms, first_seen_at, last_synced_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)"#,
                    rusqlite::params![
                        track.id,
                        track.title,
                        track.artist_id,
                        track.album_id,
                        track.duration_ms,
                        now,
                    ],
                )?;
                stats.added += 1;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    fn get_track(&self, id: &str) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .prepare("SELECT * FROM tracks WHERE id = ?1")?
            .query_row([id], Self::row_to_track)
            .optional()?;
        Ok(track)
    }

    fn artist_enrichment_candidates(&self, stale_before: i64, limit: u64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT id FROM artists
               WHERE last_synced_at = first_seen_at OR last_synced_at < ?1
               ORDER BY first_seen_at ASC, id ASC
               LIMIT ?2"#,
        )?;
        let ids = stmt
            .query_map(rusqlite::params![stale_before, limit], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn count_artist_enrichment_candidates(&self, stale_before: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM artists WHERE last_synced_at = first_seen_at OR last_synced_at < ?1",
            [stale_before],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn apply_artist_enrichment(&self, artists: &[ArtistEnrichment]) -> Result<BatchWriteStats> {
        let mut stats = BatchWriteStats::default();
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for artist in artists {
            let genres = serde_json::to_string(&artist.genres)?;
            // MAX(.., first_seen_at + 1) guarantees the row leaves the stub
            // state even if the clock equals first_seen_at.
            let updated = tx.execute(
                r#"UPDATE artists
                   SET name = ?2, genres = ?3, popularity = ?4, image_url = ?5,
                       last_synced_at = MAX(?6, first_seen_at + 1)
                   WHERE id = ?1"#,
                rusqlite::params![
                    artist.id,
                    artist.name,
                    genres,
                    artist.popularity,
                    artist.image_url,
                    now,
                ],
            )?;
            stats.updated += updated as u64;
        }

        tx.commit()?;
        Ok(stats)
    }

    fn touch_artists(&self, ids: &[String]) -> Result<()> {
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for id in ids {
            // Same MAX(.., first_seen_at + 1) trick as enrichment, so even a
            // same-second attempt takes the row out of the stub state.
            tx.execute(
                "UPDATE artists SET last_synced_at = MAX(?2, first_seen_at + 1) WHERE id = ?1",
                rusqlite::params![id, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_artist(&self, id: &str) -> Result<Option<Artist>> {
        let conn = self.conn.lock().unwrap();
        let artist = conn
            .prepare("SELECT * FROM artists WHERE id = ?1")?
            .query_row([id], Self::row_to_artist)
            .optional()?;
        Ok(artist)
    }

    fn album_enrichment_candidates(&self, stale_before: i64, limit: u64) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT id FROM albums
               WHERE last_synced_at = first_seen_at OR last_synced_at < ?1
               ORDER BY first_seen_at ASC, id ASC
               LIMIT ?2"#,
        )?;
        let ids = stmt
            .query_map(rusqlite::params![stale_before, limit], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn count_album_enrichment_candidates(&self, stale_before: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM albums WHERE last_synced_at = first_seen_at OR last_synced_at < ?1",
            [stale_before],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn apply_album_enrichment(&self, albums: &[AlbumEnrichment]) -> Result<BatchWriteStats> {
        let mut stats = BatchWriteStats::default();
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for album in albums {
            let updated = tx.execute(
                r#"UPDATE albums
                   SET name = ?2, release_date = ?3, total_tracks = ?4, image_url = ?5,
                       last_synced_at = MAX(?6, first_seen_at + 1)
                   WHERE id = ?1"#,
                rusqlite::params![
                    album.id,
                    album.name,
                    album.release_date,
                    album.total_tracks,
                    album.image_url,
                    now,
                ],
            )?;
            stats.updated += updated as u64;
        }

        tx.commit()?;
        Ok(stats)
    }

    fn touch_albums(&self, ids: &[String]) -> Result<()> {
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE albums SET last_synced_at = MAX(?2, first_seen_at + 1) WHERE id = ?1",
                rusqlite::params![id, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_album(&self, id: &str) -> Result<Option<Album>> {
        let conn = self.conn.lock().unwrap();
        let album = conn
            .prepare("SELECT * FROM albums WHERE id = ?1")?
            .query_row([id], Self::row_to_album)
            .optional()?;
        Ok(album)
    }

    fn get_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let playlist = conn
            .prepare("SELECT * FROM playlists WHERE id = ?1")?
            .query_row([id], Self::row_to_playlist)
            .optional()?;
        Ok(playlist)
    }

    fn get_playlist_snapshot(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let snapshot = conn
            .query_row(
                "SELECT snapshot_id FROM playlists WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(snapshot)
    }

    fn replace_playlist(&self, playlist: &PlaylistUpsert, track_ids: &[String]) -> Result<()> {
        let now = Self::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT INTO playlists (
                id, name, owner, snapshot_id, track_count, first_seen_at, last_synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner = excluded.owner,
                snapshot_id = excluded.snapshot_id,
                track_count = excluded.track_count,
                last_synced_at = excluded.last_synced_at"#,
            rusqlite::params![
                playlist.id,
                playlist.name,
                playlist.owner,
                playlist.snapshot_id,
                track_ids.len() as i64,
                now,
            ],
        )?;

        tx.execute(
            "DELETE FROM playlist_tracks WHERE playlist_id = ?1",
            [&playlist.id],
        )?;
        for (position, track_id) in track_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO playlist_tracks (playlist_id, position, track_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![playlist.id, position as i64, track_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn touch_playlist(&self, id: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE playlists SET last_synced_at = ?2 WHERE id = ?1",
            rusqlite::params![id, now],
        )?;
        Ok(())
    }

    fn get_playlist_tracks(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT track_id FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY position ASC",
        )?;
        let ids = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn counts(&self) -> Result<LibraryCounts> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };
        Ok(LibraryCounts {
            tracks: count("tracks")?,
            artists: count("artists")?,
            albums: count("albums")?,
            playlists: count("playlists")?,
        })
    }
}
