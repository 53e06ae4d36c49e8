//! Durable sync run and checkpoint state.
//!
//! Lives in `sync.db`, separate from the library replica. The engine is
//! restart-safe because all run progress is persisted here: a checkpoint row
//! per (run, entity type) records exactly where the next batch starts.

mod models;
mod schema;
mod store;

pub use models::*;
pub use schema::SYNC_VERSIONED_SCHEMAS;
pub use store::{SqliteSyncStateStore, SyncStateStore};
