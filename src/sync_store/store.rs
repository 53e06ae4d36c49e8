//! Sync run and checkpoint persistence.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};

use super::models::*;
use super::schema::SYNC_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;

/// Storage backend for sync run records and checkpoints.
///
/// The store is the authority on checkpoint invariants: offsets never
/// decrease within a run, and status transitions follow
/// InProgress -> {Success, Failed, RateLimited} and RateLimited -> InProgress.
pub trait SyncStateStore: Send + Sync {
    // === Runs ===

    fn create_run(&self, run: &SyncRun) -> Result<()>;

    fn get_run(&self, id: &str) -> Result<Option<SyncRun>>;

    /// Most recently started run, if any.
    fn latest_run(&self) -> Result<Option<SyncRun>>;

    /// Close an in-progress run. Fails if the run is already terminal, so a
    /// run record never changes once its status leaves InProgress.
    fn finish_run(
        &self,
        id: &str,
        status: SyncRunStatus,
        summary: &RunSummary,
        error_message: Option<&str>,
        completed_at: i64,
    ) -> Result<()>;

    /// Reopen a Cancelled run for resumption. Success and Failed runs are
    /// terminal and cannot be reopened.
    fn reopen_run(&self, id: &str) -> Result<()>;

    // === Checkpoints ===

    fn get_checkpoint(&self, run_id: &str, entity_type: EntityType) -> Result<Option<Checkpoint>>;

    fn list_checkpoints(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    /// Insert or update a checkpoint, enforcing offset monotonicity and the
    /// status transition rules.
    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// SQLite-backed sync state store.
pub struct SqliteSyncStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSyncStateStore {
    /// Open an existing sync database or create a new one with the current
    /// schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open sync database at {:?}", db_path.as_ref()))?;
        open_versioned(&conn, SYNC_VERSIONED_SCHEMAS, "sync")?;

        Ok(SqliteSyncStateStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_versioned(&conn, SYNC_VERSIONED_SCHEMAS, "sync")?;

        Ok(SqliteSyncStateStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<SyncRun> {
        Ok(SyncRun {
            id: row.get("id")?,
            kind: SyncRunKind::from_str(&row.get::<_, String>("kind")?)
                .unwrap_or(SyncRunKind::Full),
            status: SyncRunStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(SyncRunStatus::Failed),
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            summary: serde_json::from_str(&row.get::<_, String>("summary")?).unwrap_or_default(),
            error_message: row.get("error_message")?,
        })
    }

    fn row_to_checkpoint(row: &rusqlite::Row) -> rusqlite::Result<Checkpoint> {
        Ok(Checkpoint {
            run_id: row.get("run_id")?,
            entity_type: EntityType::from_str(&row.get::<_, String>("entity_type")?)
                .unwrap_or(EntityType::SavedTracks),
            current_offset: row.get::<_, i64>("current_offset")? as u64,
            total_estimated: row.get::<_, Option<i64>>("total_estimated")?.map(|n| n as u64),
            items_processed: row.get::<_, i64>("items_processed")? as u64,
            status: CheckpointStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(CheckpointStatus::Failed),
            last_error: row.get("last_error")?,
            rate_limit_reset_at: row.get("rate_limit_reset_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn transition_allowed(from: CheckpointStatus, to: CheckpointStatus) -> bool {
        if from == to {
            return true;
        }
        match from {
            CheckpointStatus::InProgress => true,
            CheckpointStatus::RateLimited => to == CheckpointStatus::InProgress,
            CheckpointStatus::Success | CheckpointStatus::Failed => false,
        }
    }
}

impl SyncStateStore for SqliteSyncStateStore {
    fn create_run(&self, run: &SyncRun) -> Result<()> {
        let summary = serde_json::to_string(&run.summary)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO sync_runs (id, kind, status, started_at, completed_at, summary, error_message)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            rusqlite::params![
                run.id,
                run.kind.as_str(),
                run.status.as_str(),
                run.started_at,
                run.completed_at,
                summary,
                run.error_message,
            ],
        )?;
        Ok(())
    }

    fn get_run(&self, id: &str) -> Result<Option<SyncRun>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .prepare("SELECT * FROM sync_runs WHERE id = ?1")?
            .query_row([id], Self::row_to_run)
            .optional()?;
        Ok(run)
    }

    fn latest_run(&self) -> Result<Option<SyncRun>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .prepare("SELECT * FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT 1")?
            .query_row([], Self::row_to_run)
            .optional()?;
        Ok(run)
    }

    fn finish_run(
        &self,
        id: &str,
        status: SyncRunStatus,
        summary: &RunSummary,
        error_message: Option<&str>,
        completed_at: i64,
    ) -> Result<()> {
        if status == SyncRunStatus::InProgress {
            bail!("Cannot finish run {} with status IN_PROGRESS", id);
        }
        let summary = serde_json::to_string(summary)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE sync_runs
               SET status = ?2, summary = ?3, error_message = ?4, completed_at = ?5
               WHERE id = ?1 AND status = 'IN_PROGRESS'"#,
            rusqlite::params![id, status.as_str(), summary, error_message, completed_at],
        )?;
        if changed == 0 {
            bail!("Run {} is not in progress, refusing to finish it", id);
        }
        Ok(())
    }

    fn reopen_run(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE sync_runs
               SET status = 'IN_PROGRESS', completed_at = NULL, error_message = NULL
               WHERE id = ?1 AND status = 'CANCELLED'"#,
            [id],
        )?;
        if changed == 0 {
            bail!("Run {} is not resumable", id);
        }
        Ok(())
    }

    fn get_checkpoint(&self, run_id: &str, entity_type: EntityType) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let checkpoint = conn
            .prepare("SELECT * FROM checkpoints WHERE key = ?1")?
            .query_row([checkpoint_key(run_id, entity_type)], Self::row_to_checkpoint)
            .optional()?;
        Ok(checkpoint)
    }

    fn list_checkpoints(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM checkpoints WHERE run_id = ?1 ORDER BY created_at, key")?;
        let checkpoints = stmt
            .query_map([run_id], Self::row_to_checkpoint)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(checkpoints)
    }

    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let key = checkpoint.key();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing = tx
            .prepare("SELECT * FROM checkpoints WHERE key = ?1")?
            .query_row([&key], Self::row_to_checkpoint)
            .optional()?;

        if let Some(existing) = existing {
            if checkpoint.current_offset < existing.current_offset {
                bail!(
                    "Checkpoint {} offset would go backwards ({} -> {})",
                    key,
                    existing.current_offset,
                    checkpoint.current_offset
                );
            }
            if !Self::transition_allowed(existing.status, checkpoint.status) {
                bail!(
                    "Checkpoint {} transition {} -> {} is not allowed",
                    key,
                    existing.status.as_str(),
                    checkpoint.status.as_str()
                );
            }
        }

        // created_at of an existing row wins on update.
        tx.execute(
            r#"INSERT INTO checkpoints (
                key, run_id, entity_type, current_offset, total_estimated, items_processed,
                status, last_error, rate_limit_reset_at, created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(key) DO UPDATE SET
                current_offset = excluded.current_offset,
                total_estimated = excluded.total_estimated,
                items_processed = excluded.items_processed,
                status = excluded.status,
                last_error = excluded.last_error,
                rate_limit_reset_at = excluded.rate_limit_reset_at,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at"#,
            rusqlite::params![
                key,
                checkpoint.run_id,
                checkpoint.entity_type.as_str(),
                checkpoint.current_offset as i64,
                checkpoint.total_estimated.map(|n| n as i64),
                checkpoint.items_processed as i64,
                checkpoint.status.as_str(),
                checkpoint.last_error,
                checkpoint.rate_limit_reset_at,
                checkpoint.created_at,
                checkpoint.updated_at,
                checkpoint.completed_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}
