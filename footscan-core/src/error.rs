use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use footscan_model::{FailureKind, ModelError, PipelineStage, ScanId};
use thiserror::Error;

/// How an external tool invocation went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Exit(i32),
    Signal(i32),
    TimedOut(Duration),
    Spawn(String),
    MissingArtifact(PathBuf),
}

impl fmt::Display for ToolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutcome::Exit(code) => write!(f, "exited with code {code}"),
            ToolOutcome::Signal(signal) => {
                write!(f, "terminated by signal {signal}")
            }
            ToolOutcome::TimedOut(limit) => {
                write!(f, "timed out after {}s", limit.as_secs())
            }
            ToolOutcome::Spawn(reason) => {
                write!(f, "could not be started: {reason}")
            }
            ToolOutcome::MissingArtifact(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                write!(f, "finished without producing {name}")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no usable images: {0}")]
    Input(String),

    #[error("{stage} stage failed: {outcome}")]
    ToolInvocation {
        stage: PipelineStage,
        outcome: ToolOutcome,
    },

    #[error("degenerate geometry: {0}")]
    Geometry(String),

    #[error("artifact storage failed: {0}")]
    Storage(String),

    #[error("scan {0} is already processing")]
    Concurrency(ScanId),

    #[error("scan {0} has already completed")]
    AlreadyCompleted(ScanId),

    #[error("scan not found: {0}")]
    NotFound(ScanId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn tool(stage: PipelineStage, outcome: ToolOutcome) -> Self {
        PipelineError::ToolInvocation { stage, outcome }
    }

    /// Taxonomy bucket recorded on a failed scan.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Input(_) => FailureKind::InputError,
            PipelineError::ToolInvocation { .. } => {
                FailureKind::ToolInvocationError
            }
            PipelineError::Geometry(_) => FailureKind::GeometryError,
            PipelineError::Storage(_) | PipelineError::Io(_) => {
                FailureKind::StorageError
            }
            PipelineError::Concurrency(_)
            | PipelineError::AlreadyCompleted(_) => {
                FailureKind::ConcurrencyError
            }
            PipelineError::NotFound(_)
            | PipelineError::Model(_)
            | PipelineError::Internal(_) => FailureKind::InternalError,
        }
    }

    /// Stage named by the error itself, if any.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::ToolInvocation { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
