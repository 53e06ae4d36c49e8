//! Local replica of the remote music library.
//!
//! Tracks, artists, albums and playlists live in `library.db`. Artists and
//! albums can exist as stubs (created from a saved-track reference, never
//! enriched) until the enrichment phases fill them in.

mod models;
mod schema;
mod store;
mod trait_def;

pub use models::*;
pub use schema::LIBRARY_VERSIONED_SCHEMAS;
pub use store::SqliteLibraryStore;
pub use trait_def::LibraryStore;
