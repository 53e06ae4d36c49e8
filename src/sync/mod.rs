//! The resumable, rate-limit-aware sync engine.
//!
//! An orchestrator drives one [`fetchers::BatchFetcher`] per entity type
//! through its pages, persisting a checkpoint after every committed batch so
//! a crash, cancellation or rate-limit pause loses no work.

pub mod batch;
pub mod fetchers;
pub mod orchestrator;
pub mod progress;
pub mod rate_limiter;

pub use batch::BatchOutcome;
pub use orchestrator::{OrchestratorSettings, PhaseStatus, RunStatusSummary, SyncOrchestrator};
pub use progress::{ProgressEvent, ProgressSink};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};

/// Returned from any suspension point when the run's cancellation token
/// fires. The orchestrator turns this into a Cancelled run record.
#[derive(Debug, thiserror::Error)]
#[error("Sync cancelled")]
pub struct Cancelled;
