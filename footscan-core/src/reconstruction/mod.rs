//! External structure-from-motion toolchain.
//!
//! The pipeline only sees [`ReconstructionTool`]; [`ColmapTool`] drives the
//! real COLMAP binary and tests substitute doubles.

use async_trait::async_trait;
use footscan_model::PipelineStage;

use crate::error::{PipelineError, Result, ToolOutcome};
use crate::working_set::WorkingSet;

mod colmap;

pub use colmap::ColmapTool;

/// The three external stages, each run to completion against one
/// working set before the next starts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReconstructionTool: Send + Sync {
    /// Detect features in `images/` into `database.db`.
    async fn extract(&self, working_set: &WorkingSet) -> Result<()>;

    /// Match every image pair recorded in the database.
    async fn match_features(&self, working_set: &WorkingSet) -> Result<()>;

    /// Incremental sparse reconstruction into `sparse/`.
    async fn map(&self, working_set: &WorkingSet) -> Result<()>;
}

/// Run one external stage and check the artifacts later stages rely on.
pub async fn run_stage(
    tool: &dyn ReconstructionTool,
    stage: PipelineStage,
    working_set: &WorkingSet,
) -> Result<()> {
    match stage {
        PipelineStage::FeatureExtraction => {
            tool.extract(working_set).await?;
            let database = working_set.database_path();
            let present = tokio::fs::try_exists(&database)
                .await
                .unwrap_or(false)
                && tokio::fs::metadata(&database)
                    .await
                    .is_ok_and(|meta| meta.is_file());
            if !present {
                return Err(PipelineError::tool(
                    stage,
                    ToolOutcome::MissingArtifact(database),
                ));
            }
            Ok(())
        }
        PipelineStage::FeatureMatching => {
            tool.match_features(working_set).await
        }
        PipelineStage::Mapping => tool.map(working_set).await,
        other => Err(PipelineError::Internal(format!(
            "{other} is not an external reconstruction stage"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use footscan_model::ScanId;
    use tempfile::TempDir;

    use super::*;

    fn working_set(root: &TempDir) -> WorkingSet {
        WorkingSet::create(root.path(), &ScanId::parse("scan-1").unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn extraction_without_database_is_a_missing_artifact() {
        let root = TempDir::new().unwrap();
        let ws = working_set(&root);
        let mut tool = MockReconstructionTool::new();
        tool.expect_extract().times(1).returning(|_| Ok(()));

        let err = run_stage(&tool, PipelineStage::FeatureExtraction, &ws)
            .await
            .unwrap_err();

        match err {
            PipelineError::ToolInvocation { stage, outcome } => {
                assert_eq!(stage, PipelineStage::FeatureExtraction);
                assert!(matches!(outcome, ToolOutcome::MissingArtifact(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn directory_in_place_of_database_is_a_missing_artifact() {
        let root = TempDir::new().unwrap();
        let ws = working_set(&root);
        let mut tool = MockReconstructionTool::new();
        tool.expect_extract()
            .times(1)
            .returning(|ws| Ok(std::fs::create_dir(ws.database_path())?));

        let err = run_stage(&tool, PipelineStage::FeatureExtraction, &ws)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::ToolInvocation {
                outcome: ToolOutcome::MissingArtifact(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stages_dispatch_to_their_tool_call() {
        let root = TempDir::new().unwrap();
        let ws = working_set(&root);
        std::fs::write(ws.database_path(), b"db").unwrap();

        let mut tool = MockReconstructionTool::new();
        tool.expect_extract().times(1).returning(|_| Ok(()));
        tool.expect_match_features().times(1).returning(|_| Ok(()));
        tool.expect_map().times(1).returning(|_| {
            Err(PipelineError::tool(PipelineStage::Mapping, ToolOutcome::Exit(1)))
        });

        for stage in [PipelineStage::FeatureExtraction, PipelineStage::FeatureMatching]
        {
            run_stage(&tool, stage, &ws).await.unwrap();
        }
        let err = run_stage(&tool, PipelineStage::Mapping, &ws)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(PipelineStage::Mapping));
    }

    #[tokio::test]
    async fn internal_stages_are_rejected() {
        let root = TempDir::new().unwrap();
        let ws = working_set(&root);
        let tool = MockReconstructionTool::new();

        let err = run_stage(&tool, PipelineStage::Meshing, &ws)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }
}
