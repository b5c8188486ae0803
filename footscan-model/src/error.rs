use std::fmt::{self, Display};

use crate::scan::ScanStatus;

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidScanId(String),
    InvalidTransition { from: ScanStatus, to: ScanStatus },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidScanId(raw) => {
                write!(f, "invalid scan id: {raw:?}")
            }
            ModelError::InvalidTransition { from, to } => {
                write!(f, "invalid scan transition {from} -> {to}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
