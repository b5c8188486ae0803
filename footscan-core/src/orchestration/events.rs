use chrono::{DateTime, Utc};
use footscan_model::{PipelineStage, ScanId, ScanStatus};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEventKind {
    StatusChanged {
        status: ScanStatus,
    },
    StageStarted {
        stage: PipelineStage,
    },
    StageFinished {
        stage: PipelineStage,
        elapsed_ms: u64,
    },
}

/// Progress notification emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEvent {
    pub scan_id: ScanId,
    #[serde(flatten)]
    pub kind: ScanEventKind,
    pub at: DateTime<Utc>,
}

impl ScanEvent {
    pub fn new(scan_id: ScanId, kind: ScanEventKind) -> Self {
        Self {
            scan_id,
            kind,
            at: Utc::now(),
        }
    }
}

/// In-process fan-out of [`ScanEvent`]s. Publishing never blocks; a
/// subscriber that falls more than `capacity` events behind observes
/// `RecvError::Lagged`.
#[derive(Debug)]
pub struct ScanEventBus {
    sender: broadcast::Sender<ScanEvent>,
}

impl ScanEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ScanEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
