//! Core data model definitions shared across FootScan crates.
#![allow(missing_docs)]

pub mod error;
pub mod failure;
pub mod ids;
pub mod scan;
pub mod stage;

pub use error::{ModelError, Result as ModelResult};
pub use failure::{FailureKind, ScanFailure};
pub use ids::ScanId;
pub use scan::{Scan, ScanStatus, ScanStatusView};
pub use stage::PipelineStage;
