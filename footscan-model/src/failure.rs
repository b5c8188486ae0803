use std::fmt;

use crate::stage::PipelineStage;

/// Classification surfaced to status callers for a failed scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureKind {
    InputError,
    ToolInvocationError,
    GeometryError,
    StorageError,
    ConcurrencyError,
    InternalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InputError => "InputError",
            FailureKind::ToolInvocationError => "ToolInvocationError",
            FailureKind::GeometryError => "GeometryError",
            FailureKind::StorageError => "StorageError",
            FailureKind::ConcurrencyError => "ConcurrencyError",
            FailureKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure record kept on a `Failed` scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFailure {
    pub kind: FailureKind,
    /// Stage that was running when the failure occurred.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub stage: Option<PipelineStage>,
    pub detail: String,
}

impl ScanFailure {
    pub fn new(
        kind: FailureKind,
        stage: Option<PipelineStage>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            stage,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} [{}]: {}", self.kind, stage, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}
