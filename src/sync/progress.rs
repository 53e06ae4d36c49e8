//! Progress event stream for external observers.

use tokio::sync::mpsc;

use crate::sync_store::EntityType;

/// One progress update from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: EntityType,
    pub current: u64,
    pub total: Option<u64>,
    pub message: String,
}

/// Fire-and-forget sender side of the progress stream. A dropped or absent
/// receiver never blocks or fails the sync.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event. Used when no observer is attached.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(
        &self,
        phase: EntityType,
        current: u64,
        total: Option<u64>,
        message: impl Into<String>,
    ) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                phase,
                current,
                total,
                message: message.into(),
            });
        }
    }
}
