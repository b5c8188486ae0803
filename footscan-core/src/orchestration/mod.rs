//! Scan orchestration: per-scan state machine, concurrency budget and
//! progress events.

pub mod events;
mod registry;
pub mod runtime;

pub use events::{ScanEvent, ScanEventBus, ScanEventKind};
pub use runtime::{Orchestrator, SubmitAck};
