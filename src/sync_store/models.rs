//! Data models for sync runs and checkpoints.

use serde::{Deserialize, Serialize};

/// Entity type synchronized by one phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    SavedTracks,
    Artists,
    Albums,
    Playlists,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::SavedTracks => "SAVED_TRACKS",
            EntityType::Artists => "ARTISTS",
            EntityType::Albums => "ALBUMS",
            EntityType::Playlists => "PLAYLISTS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SAVED_TRACKS" => Some(EntityType::SavedTracks),
            "ARTISTS" => Some(EntityType::Artists),
            "ALBUMS" => Some(EntityType::Albums),
            "PLAYLISTS" => Some(EntityType::Playlists),
            _ => None,
        }
    }
}

/// Kind of sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncRunKind {
    /// Walk every page of every phase.
    Full,
    /// Stop the saved-track phase early once a page adds nothing new.
    Incremental,
}

impl SyncRunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunKind::Full => "FULL",
            SyncRunKind::Incremental => "INCREMENTAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "FULL" => Some(SyncRunKind::Full),
            "INCREMENTAL" => Some(SyncRunKind::Incremental),
            _ => None,
        }
    }
}

/// Status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncRunStatus {
    InProgress,
    Success,   // terminal
    Failed,    // terminal, recovery is a fresh run
    Cancelled, // resumable via reopen
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::InProgress => "IN_PROGRESS",
            SyncRunStatus::Success => "SUCCESS",
            SyncRunStatus::Failed => "FAILED",
            SyncRunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(SyncRunStatus::InProgress),
            "SUCCESS" => Some(SyncRunStatus::Success),
            "FAILED" => Some(SyncRunStatus::Failed),
            "CANCELLED" => Some(SyncRunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Status of one checkpoint (one phase of a run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    InProgress,
    Success, // terminal
    Failed,  // terminal
    RateLimited,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "IN_PROGRESS",
            CheckpointStatus::Success => "SUCCESS",
            CheckpointStatus::Failed => "FAILED",
            CheckpointStatus::RateLimited => "RATE_LIMITED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(CheckpointStatus::InProgress),
            "SUCCESS" => Some(CheckpointStatus::Success),
            "FAILED" => Some(CheckpointStatus::Failed),
            "RATE_LIMITED" => Some(CheckpointStatus::RateLimited),
            _ => None,
        }
    }
}

/// Per-entity-type counters kept on the run record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub tracks_processed: u64,
    pub artists_processed: u64,
    pub albums_processed: u64,
    pub playlists_processed: u64,
}

impl RunSummary {
    pub fn add(&mut self, entity_type: EntityType, items: u64) {
        match entity_type {
            EntityType::SavedTracks => self.tracks_processed += items,
            EntityType::Artists => self.artists_processed += items,
            EntityType::Albums => self.albums_processed += items,
            EntityType::Playlists => self.playlists_processed += items,
        }
    }
}

/// One orchestrator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRun {
    pub id: String,
    pub kind: SyncRunKind,
    pub status: SyncRunStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub summary: RunSummary,
    pub error_message: Option<String>,
}

/// Durable resume point for one (run, entity type) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub run_id: String,
    pub entity_type: EntityType,
    /// Never decreases within a run.
    pub current_offset: u64,
    pub total_estimated: Option<u64>,
    pub items_processed: u64,
    pub status: CheckpointStatus,
    pub last_error: Option<String>,
    pub rate_limit_reset_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Checkpoint {
    pub fn new(run_id: &str, entity_type: EntityType, now: i64) -> Self {
        Checkpoint {
            run_id: run_id.to_string(),
            entity_type,
            current_offset: 0,
            total_estimated: None,
            items_processed: 0,
            status: CheckpointStatus::InProgress,
            last_error: None,
            rate_limit_reset_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Composite storage key.
    pub fn key(&self) -> String {
        checkpoint_key(&self.run_id, self.entity_type)
    }
}

pub fn checkpoint_key(run_id: &str, entity_type: EntityType) -> String {
    format!("{}:{}", run_id, entity_type.as_str())
}
