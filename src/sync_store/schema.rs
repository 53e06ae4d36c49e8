//! Database schema for sync.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

const SYNC_RUNS_TABLE_V1: Table = Table {
    name: "sync_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
        // JSON-encoded RunSummary.
        sqlite_column!("summary", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
    ],
    indices: &[("idx_runs_started", "started_at")],
};

const CHECKPOINTS_TABLE_V1: Table = Table {
    name: "checkpoints",
    columns: &[
        // "{run_id}:{entity_type}"
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("run_id", &SqlType::Text, non_null = true),
        sqlite_column!("entity_type", &SqlType::Text, non_null = true),
        sqlite_column!("current_offset", &SqlType::Integer, non_null = true),
        sqlite_column!("total_estimated", &SqlType::Integer),
        sqlite_column!(
            "items_processed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("rate_limit_reset_at", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[("idx_checkpoints_run", "run_id")],
};

pub const SYNC_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[SYNC_RUNS_TABLE_V1, CHECKPOINTS_TABLE_V1],
    migration: None,
}];
