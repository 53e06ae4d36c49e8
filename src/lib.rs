//! Melosync library.
//!
//! Replicates a user's remote music library (saved tracks, artists, albums,
//! playlists) into a local SQLite store through a paginated, rate-limited
//! HTTP API. The sync engine is resumable: progress is checkpointed after
//! every batch, so a crash, a cancellation or a day-long rate-limit window
//! loses no work.

pub mod config;
pub mod library_store;
pub mod remote;
pub mod sqlite_persistence;
pub mod sync;
pub mod sync_store;

// Re-export the types callers interact with.
pub use library_store::{LibraryStore, SqliteLibraryStore};
pub use sync::{ProgressEvent, ProgressSink, RateLimiter, SyncOrchestrator};
pub use sync_store::{SqliteSyncStateStore, SyncStateStore};
