//! End-to-end tests for the sync engine
//!
//! Each test drives a full orchestrator against an in-memory fake remote and
//! in-memory stores, and asserts on the replicated library plus the persisted
//! run and checkpoint records.

mod common;

use common::{remote_with_tracks, TestHarness};
use melosync::library_store::LibraryStore;
use melosync::remote::RemoteError;
use melosync::sync_store::{
    CheckpointStatus, EntityType, SyncRunKind, SyncRunStatus, SyncStateStore,
};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_full_sync_replicates_remote_library() {
    let remote = remote_with_tracks(130);
    remote.set_playlist("pl-1", "snap-1", &["track-000", "track-001"]);
    remote.set_playlist("pl-2", "snap-1", &["track-002"]);
    let harness = TestHarness::new(remote);

    let run = harness
        .orchestrator
        .run(SyncRunKind::Full, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, SyncRunStatus::Success);
    assert_eq!(run.summary.tracks_processed, 130);
    assert_eq!(run.summary.artists_processed, 7);
    assert_eq!(run.summary.albums_processed, 11);
    assert_eq!(run.summary.playlists_processed, 2);

    let counts = harness.library.counts().unwrap();
    assert_eq!(counts.tracks, 130);
    assert_eq!(counts.artists, 7);
    assert_eq!(counts.albums, 11);
    assert_eq!(counts.playlists, 2);

    // Enrichment turned the referenced artists from stubs into full rows.
    let artist = harness.library.get_artist("artist-0").unwrap().unwrap();
    assert!(!artist.is_stub());
    assert_eq!(artist.popularity, Some(50));
    assert_eq!(artist.genres, vec!["electronic".to_string()]);

    let members = harness.library.get_playlist_tracks("pl-1").unwrap();
    assert_eq!(members, vec!["track-000".to_string(), "track-001".to_string()]);

    let checkpoints = harness.sync_store.list_checkpoints(&run.id).unwrap();
    assert_eq!(checkpoints.len(), 4);
    assert!(checkpoints
        .iter()
        .all(|c| c.status == CheckpointStatus::Success));
}

#[tokio::test]
async fn test_second_sync_is_idempotent() {
    let harness = TestHarness::new(remote_with_tracks(60));
    let cancel = CancellationToken::new();

    harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();

    assert_eq!(second.status, SyncRunStatus::Success);
    // Pages are re-listed in full but nothing is stale, so the enrichment
    // phases find no candidates.
    assert_eq!(second.summary.tracks_processed, 60);
    assert_eq!(second.summary.artists_processed, 0);
    assert_eq!(second.summary.albums_processed, 0);
    assert_eq!(harness.library.counts().unwrap().tracks, 60);
}

#[tokio::test]
async fn test_incremental_sync_stops_on_known_page() {
    let harness = TestHarness::new(remote_with_tracks(130));
    let cancel = CancellationToken::new();

    harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();
    let incremental = harness
        .orchestrator
        .run(SyncRunKind::Incremental, &cancel)
        .await
        .unwrap();

    assert_eq!(incremental.status, SyncRunStatus::Success);
    // The first page contained nothing new, so the phase ended there.
    assert_eq!(incremental.summary.tracks_processed, 50);
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limited_page_is_retried_at_same_offset() {
    let remote = remote_with_tracks(130);
    // First page succeeds, second page is rejected with a 429.
    remote.inject_ok();
    remote.inject_error(RemoteError::RateLimited {
        retry_after_secs: Some(30),
    });
    let harness = TestHarness::new(remote);

    let run = harness
        .orchestrator
        .run(SyncRunKind::Full, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, SyncRunStatus::Success);
    assert_eq!(harness.library.counts().unwrap().tracks, 130);

    // The rejected page was re-issued at the same offset and counted once.
    let checkpoint = harness
        .sync_store
        .get_checkpoint(&run.id, EntityType::SavedTracks)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.current_offset, 130);
    assert_eq!(checkpoint.items_processed, 130);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_retry_after_uses_default_wait() {
    let remote = remote_with_tracks(30);
    remote.inject_error(RemoteError::RateLimited {
        retry_after_secs: None,
    });
    let harness = TestHarness::new(remote);

    let run = harness
        .orchestrator
        .run(SyncRunKind::Full, &CancellationToken::new())
        .await
        .unwrap();

    // Paused time fast-forwards through the 24h default window.
    assert_eq!(run.status, SyncRunStatus::Success);
    assert_eq!(harness.library.counts().unwrap().tracks, 30);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_remote_failure_fails_run_and_fresh_run_recovers() {
    let remote = remote_with_tracks(60);
    remote.inject_error(RemoteError::Transient("connection reset".to_string()));
    let harness = TestHarness::new(remote);
    let cancel = CancellationToken::new();

    let failed = harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();

    assert_eq!(failed.status, SyncRunStatus::Failed);
    assert!(failed.error_message.is_some());
    let checkpoint = harness
        .sync_store
        .get_checkpoint(&failed.id, EntityType::SavedTracks)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    assert_eq!(checkpoint.current_offset, 0);

    // Failed runs are terminal; recovery is a new run over the same stores.
    assert!(harness
        .orchestrator
        .resume(&failed.id, &cancel)
        .await
        .is_err());
    let retry = harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(retry.status, SyncRunStatus::Success);
    assert_eq!(harness.library.counts().unwrap().tracks, 60);
}

// ============================================================================
// Cancellation and Resume
// ============================================================================

#[tokio::test]
async fn test_cancelled_run_resumes_to_completion() {
    let harness = TestHarness::new(remote_with_tracks(130));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled = harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();
    assert_eq!(cancelled.status, SyncRunStatus::Cancelled);

    let resumed = harness
        .orchestrator
        .resume(&cancelled.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resumed.id, cancelled.id);
    assert_eq!(resumed.status, SyncRunStatus::Success);
    assert_eq!(resumed.summary.tracks_processed, 130);
    assert_eq!(harness.library.counts().unwrap().tracks, 130);
}

// ============================================================================
// Playlists
// ============================================================================

#[tokio::test]
async fn test_changed_playlist_snapshot_replaces_members() {
    let remote = remote_with_tracks(10);
    remote.set_playlist("pl-1", "snap-1", &["track-000", "track-001"]);
    let harness = TestHarness::new(remote);
    let cancel = CancellationToken::new();

    harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();

    harness
        .remote
        .set_playlist("pl-1", "snap-2", &["track-002", "track-003", "track-004"]);
    harness
        .orchestrator
        .run(SyncRunKind::Full, &cancel)
        .await
        .unwrap();

    let members = harness.library.get_playlist_tracks("pl-1").unwrap();
    assert_eq!(
        members,
        vec![
            "track-002".to_string(),
            "track-003".to_string(),
            "track-004".to_string()
        ]
    );
    let playlist = harness.library.get_playlist("pl-1").unwrap().unwrap();
    assert_eq!(playlist.snapshot_id, "snap-2");
}

// ============================================================================
// Status Projection
// ============================================================================

#[tokio::test]
async fn test_status_reports_completed_phases() {
    let harness = TestHarness::new(remote_with_tracks(130));

    let run = harness
        .orchestrator
        .run(SyncRunKind::Full, &CancellationToken::new())
        .await
        .unwrap();

    let status = harness.orchestrator.current_status(&run.id).unwrap();
    assert_eq!(status.run.status, SyncRunStatus::Success);
    assert_eq!(status.phases.len(), 4);
    assert!(status
        .phases
        .iter()
        .all(|p| p.status == CheckpointStatus::Success));

    let tracks = status
        .phases
        .iter()
        .find(|p| p.entity_type == EntityType::SavedTracks)
        .unwrap();
    assert_eq!(tracks.current_offset, 130);
    assert_eq!(tracks.percent_complete, Some(100.0));
}
