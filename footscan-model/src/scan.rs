use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::failure::ScanFailure;
use crate::ids::ScanId;
use crate::stage::PipelineStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScanStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Whether `self -> next` is a legal edge of the scan state machine.
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        matches!(
            (self, next),
            (ScanStatus::Uploading, ScanStatus::Processing)
                | (ScanStatus::Uploading, ScanStatus::Failed)
                | (ScanStatus::Processing, ScanStatus::Completed)
                | (ScanStatus::Processing, ScanStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Uploading => "uploading",
            ScanStatus::Processing => "processing",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end request to turn a set of photographs into a mesh.
///
/// Every mutation goes through the transition methods below, which refuse
/// to move a scan out of `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scan {
    pub id: ScanId,
    pub status: ScanStatus,
    pub images: Vec<PathBuf>,
    pub stage: Option<PipelineStage>,
    pub result_path: Option<PathBuf>,
    pub preview_path: Option<PathBuf>,
    pub failure: Option<ScanFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scan {
    pub fn new(id: ScanId, images: Vec<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: ScanStatus::Uploading,
            images,
            stage: None,
            result_path: None,
            preview_path: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: ScanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn begin_processing(&mut self) -> Result<()> {
        self.transition(ScanStatus::Processing)
    }

    /// Record progress. Only meaningful while `Processing`.
    pub fn enter_stage(&mut self, stage: PipelineStage) -> Result<()> {
        if self.status != ScanStatus::Processing {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: ScanStatus::Processing,
            });
        }
        self.stage = Some(stage);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(
        &mut self,
        result_path: PathBuf,
        preview_path: PathBuf,
    ) -> Result<()> {
        self.transition(ScanStatus::Completed)?;
        self.stage = None;
        self.result_path = Some(result_path);
        self.preview_path = Some(preview_path);
        Ok(())
    }

    pub fn fail(&mut self, failure: ScanFailure) -> Result<()> {
        self.transition(ScanStatus::Failed)?;
        self.stage = None;
        self.failure = Some(failure);
        Ok(())
    }

    pub fn view(&self) -> ScanStatusView {
        ScanStatusView {
            scan_id: self.id.clone(),
            status: self.status,
            stage: self.stage,
            result_ref: self.result_path.clone(),
            preview_ref: self.preview_path.clone(),
            error: self.failure.clone(),
            image_count: Some(self.images.len()),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }
}

/// Read-only projection returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanStatusView {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub stage: Option<PipelineStage>,
    pub result_ref: Option<PathBuf>,
    pub preview_ref: Option<PathBuf>,
    pub error: Option<ScanFailure>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub image_count: Option<usize>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ScanStatusView {
    /// View reconstructed purely from persisted artifacts.
    pub fn completed_from_artifacts(
        scan_id: ScanId,
        result_ref: PathBuf,
        preview_ref: Option<PathBuf>,
    ) -> Self {
        Self {
            scan_id,
            status: ScanStatus::Completed,
            stage: None,
            result_ref: Some(result_ref),
            preview_ref,
            error: None,
            image_count: None,
            created_at: None,
            updated_at: None,
        }
    }
}
