//! Per-batch fetch outcome.

/// Result of one `fetch_batch` call. Never persisted; the orchestrator folds
/// it into the phase's checkpoint.
///
/// Rate limiting and remote failures are fields here rather than errors, so
/// the orchestrator can apply uniform resume logic. Only persistence and
/// contract failures surface as `Err` from a fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub items_processed: u64,
    pub new_items_added: u64,
    pub items_updated: u64,
    /// More pages remain after this one.
    pub has_more: bool,
    /// Offset the next batch should start at. Equals the input offset when
    /// the batch was rate limited or failed.
    pub next_offset: u64,
    pub rate_limited: bool,
    /// Unix seconds when the remote expects requests again.
    pub rate_limit_reset_at: Option<i64>,
    /// Candidate-set or remote-reported total, when known.
    pub total_estimated: Option<u64>,
    pub error: Option<String>,
}

impl BatchOutcome {
    /// A batch succeeded iff it neither failed nor hit the rate limit.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.rate_limited
    }

    pub fn rate_limited(offset: u64, reset_at: Option<i64>) -> Self {
        BatchOutcome {
            next_offset: offset,
            rate_limited: true,
            rate_limit_reset_at: reset_at,
            ..Default::default()
        }
    }

    pub fn failed(offset: u64, error: impl Into<String>) -> Self {
        BatchOutcome {
            next_offset: offset,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
