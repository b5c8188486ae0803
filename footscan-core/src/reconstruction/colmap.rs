use std::collections::VecDeque;
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use footscan_model::PipelineStage;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::ReconstructionTool;
use crate::config::ReconstructionConfig;
use crate::error::{PipelineError, Result, ToolOutcome};
use crate::working_set::WorkingSet;

/// Invokes the COLMAP command line, one process per stage.
///
/// Every process runs inside the scan's working set and is killed if its
/// timeout elapses or the awaiting future is dropped.
#[derive(Debug, Clone)]
pub struct ColmapTool {
    config: ReconstructionConfig,
}

impl ColmapTool {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for `stage`, subcommand first.
    pub fn arguments(
        &self,
        stage: PipelineStage,
        working_set: &WorkingSet,
    ) -> Result<Vec<OsString>> {
        let flag = |on: bool| if on { "1" } else { "0" };
        let database = working_set.database_path().into_os_string();
        let images = working_set.images_dir().into_os_string();

        let args: Vec<OsString> = match stage {
            PipelineStage::FeatureExtraction => vec![
                "feature_extractor".into(),
                "--database_path".into(),
                database,
                "--image_path".into(),
                images,
                "--ImageReader.single_camera".into(),
                flag(self.config.single_camera).into(),
                "--SiftExtraction.use_gpu".into(),
                flag(self.config.use_gpu).into(),
            ],
            PipelineStage::FeatureMatching => vec![
                "exhaustive_matcher".into(),
                "--database_path".into(),
                database,
                "--SiftMatching.use_gpu".into(),
                flag(self.config.use_gpu).into(),
            ],
            PipelineStage::Mapping => vec![
                "mapper".into(),
                "--database_path".into(),
                database,
                "--image_path".into(),
                images,
                "--output_path".into(),
                working_set.sparse_dir().into_os_string(),
            ],
            other => {
                return Err(PipelineError::Internal(format!(
                    "COLMAP has no {other} stage"
                )));
            }
        };
        Ok(args)
    }

    async fn run(
        &self,
        stage: PipelineStage,
        working_set: &WorkingSet,
    ) -> Result<()> {
        let args = self.arguments(stage, working_set)?;
        let mut cmd = Command::new(&self.config.colmap_path);
        cmd.args(&args)
            .current_dir(working_set.root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%stage, command = ?cmd, "starting COLMAP");

        let mut child = cmd.spawn().map_err(|err| {
            PipelineError::tool(stage, ToolOutcome::Spawn(err.to_string()))
        })?;

        let tail_lines = self.config.stderr_tail_lines;
        let stderr = child.stderr.take();
        let collector = tokio::spawn(async move {
            match stderr {
                Some(stderr) => stderr_tail(stderr, tail_lines).await,
                None => Vec::new(),
            }
        });

        let limit = self.config.stage_timeout();
        let status = match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                collector.abort();
                return Err(PipelineError::tool(
                    stage,
                    ToolOutcome::Spawn(format!("failed to wait: {err}")),
                ));
            }
            Err(_) => {
                // Grandchildren may still hold stderr open.
                collector.abort();
                if let Err(err) = child.kill().await {
                    debug!(%stage, error = %err, "failed to kill timed out COLMAP");
                }
                return Err(PipelineError::tool(
                    stage,
                    ToolOutcome::TimedOut(limit),
                ));
            }
        };

        let tail = collector.await.unwrap_or_default();
        if !status.success() {
            debug!(%stage, stderr = %tail.join("\n"), "COLMAP stderr tail");
            return Err(PipelineError::tool(stage, failure_outcome(status)));
        }

        info!(%stage, "COLMAP stage finished");
        Ok(())
    }
}

#[async_trait]
impl ReconstructionTool for ColmapTool {
    async fn extract(&self, working_set: &WorkingSet) -> Result<()> {
        self.run(PipelineStage::FeatureExtraction, working_set).await
    }

    async fn match_features(&self, working_set: &WorkingSet) -> Result<()> {
        self.run(PipelineStage::FeatureMatching, working_set).await
    }

    async fn map(&self, working_set: &WorkingSet) -> Result<()> {
        self.run(PipelineStage::Mapping, working_set).await
    }
}

/// Last `keep` lines written to `reader`.
async fn stderr_tail<R>(reader: R, keep: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(keep);
    while let Ok(Some(line)) = lines.next_line().await {
        if keep == 0 {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

fn failure_outcome(status: ExitStatus) -> ToolOutcome {
    if let Some(code) = status.code() {
        return ToolOutcome::Exit(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ToolOutcome::Signal(signal);
        }
    }
    ToolOutcome::Exit(-1)
}
