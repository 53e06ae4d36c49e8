//! Database schema for library.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, SqlType, Table, VersionedSchema};

const ARTISTS_TABLE_V1: Table = Table {
    name: "artists",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        // JSON array of genre strings.
        sqlite_column!("genres", &SqlType::Text, non_null = true, default_value = Some("'[]'")),
        sqlite_column!("popularity", &SqlType::Integer),
        sqlite_column!("image_url", &SqlType::Text),
        sqlite_column!("first_seen_at", &SqlType::Integer, non_null = true),
        sqlite_column!("last_synced_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_artists_sync", "last_synced_at, first_seen_at, id")],
};

const ALBUMS_TABLE_V1: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("release_date", &SqlType::Text),
        sqlite_column!("total_tracks", &SqlType::Integer),
        sqlite_column!("image_url", &SqlType::Text),
        sqlite_column!("first_seen_at", &SqlType::Integer, non_null = true),
        sqlite_column!("last_synced_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_albums_sync", "last_synced_at, first_seen_at, id"),
        ("idx_albums_artist", "artist_id"),
    ],
};

const TRACKS_TABLE_V1: Table = Table {
    name: "tracks",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist_id", &SqlType::Text, non_null = true),
        sqlite_column!("album_id", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("first_seen_at", &SqlType::Integer, non_null = true),
        sqlite_column!("last_synced_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_tracks_artist", "artist_id"),
        ("idx_tracks_album", "album_id"),
    ],
};

const PLAYLISTS_TABLE_V1: Table = Table {
    name: "playlists",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("owner", &SqlType::Text),
        sqlite_column!("snapshot_id", &SqlType::Text, non_null = true),
        sqlite_column!("track_count", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("first_seen_at", &SqlType::Integer, non_null = true),
        sqlite_column!("last_synced_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

const PLAYLIST_TRACKS_TABLE_V1: Table = Table {
    name: "playlist_tracks",
    columns: &[
        sqlite_column!(
            "playlist_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "playlists",
                foreign_column: "id",
            })
        ),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
        sqlite_column!("track_id", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_playlist_tracks_playlist", "playlist_id, position"),
        ("idx_playlist_tracks_track", "track_id"),
    ],
};

pub const LIBRARY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        ARTISTS_TABLE_V1,
        ALBUMS_TABLE_V1,
        TRACKS_TABLE_V1,
        PLAYLISTS_TABLE_V1,
        PLAYLIST_TRACKS_TABLE_V1,
    ],
    migration: None,
}];
