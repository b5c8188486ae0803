use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use footscan_model::{
    PipelineStage, Scan, ScanFailure, ScanId, ScanStatus, ScanStatusView,
};
use serde::Serialize;
use tokio::fs::File;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinError;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use super::events::{ScanEvent, ScanEventBus, ScanEventKind};
use super::registry::ScanRegistry;
use crate::artifacts::{ArtifactStore, StoredArtifacts};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::mesh::{
    ConvexHullReconstructor, MeshBuilder, SurfaceReconstructor, export,
};
use crate::point_cloud::PointCloudExtractor;
use crate::preprocess::ImagePreprocessor;
use crate::reconstruction::{self, ColmapTool, ReconstructionTool};
use crate::working_set::WorkingSet;

/// Returned by [`Orchestrator::submit`] once the scan is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitAck {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    pub accepted_images: usize,
}

/// Drives scans through the pipeline.
///
/// Cheap to clone; every clone shares the same registry, artifact store,
/// event bus and concurrency budget.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    tool: Arc<dyn ReconstructionTool>,
    preprocessor: ImagePreprocessor,
    extractor: PointCloudExtractor,
    mesh_builder: MeshBuilder,
    store: ArtifactStore,
    registry: ScanRegistry,
    permits: Arc<Semaphore>,
    events: ScanEventBus,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("results", &self.inner.store.root())
            .field("available_permits", &self.inner.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator backed by the COLMAP command line.
    pub fn with_colmap(config: PipelineConfig) -> Self {
        let tool = Arc::new(ColmapTool::new(config.reconstruction.clone()));
        Self::new(config, tool)
    }

    pub fn new(config: PipelineConfig, tool: Arc<dyn ReconstructionTool>) -> Self {
        Self::with_reconstructor(config, tool, Arc::new(ConvexHullReconstructor))
    }

    pub fn with_reconstructor(
        config: PipelineConfig,
        tool: Arc<dyn ReconstructionTool>,
        reconstructor: Arc<dyn SurfaceReconstructor>,
    ) -> Self {
        let permits = config.orchestrator.max_concurrent_scans.max(1);
        let inner = Inner {
            tool,
            preprocessor: ImagePreprocessor::new(config.preprocess.clone()),
            extractor: PointCloudExtractor::new(
                config.mesh.max_reprojection_error,
            ),
            mesh_builder: MeshBuilder::with_reconstructor(
                config.mesh.clone(),
                reconstructor,
            ),
            store: ArtifactStore::new(config.storage.results_dir.clone()),
            registry: ScanRegistry::default(),
            permits: Arc::new(Semaphore::new(permits)),
            events: ScanEventBus::new(config.orchestrator.event_channel_capacity),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Register a scan and start its pipeline in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn submit(
        &self,
        scan_id: ScanId,
        images: Vec<PathBuf>,
    ) -> Result<SubmitAck> {
        // Artifacts from an earlier process count as completed.
        if !self.inner.registry.contains(&scan_id)
            && self.inner.store.has_result(&scan_id).await
        {
            return Err(PipelineError::AlreadyCompleted(scan_id));
        }

        let accepted_images = images.len();
        self.inner.registry.claim(Scan::new(scan_id.clone(), images))?;
        self.publish(&scan_id, ScanEventKind::StatusChanged {
            status: ScanStatus::Uploading,
        });
        info!(scan_id = %scan_id, images = accepted_images, "scan accepted");

        let orchestrator = self.clone();
        let run_id = scan_id.clone();
        tokio::spawn(async move { orchestrator.drive(run_id).await });

        Ok(SubmitAck {
            scan_id,
            status: ScanStatus::Uploading,
            accepted_images,
        })
    }

    /// Current state of a scan. Falls back to the artifact store for scans
    /// this process has not seen.
    pub async fn status(&self, scan_id: &ScanId) -> Result<ScanStatusView> {
        let store = &self.inner.store;
        if let Some(scan) = self.inner.registry.snapshot(scan_id) {
            let mut view = scan.view();
            // The result file is renamed into place a moment before the
            // registry records completion; the file wins.
            if view.status == ScanStatus::Processing
                && view.stage == Some(PipelineStage::Storing)
                && store.has_result(scan_id).await
            {
                view.status = ScanStatus::Completed;
                view.stage = None;
                view.result_ref = Some(store.result_path(scan_id));
                view.preview_ref = store
                    .has_preview(scan_id)
                    .await
                    .then(|| store.preview_path(scan_id));
            }
            return Ok(view);
        }

        if store.has_result(scan_id).await {
            let preview = store
                .has_preview(scan_id)
                .await
                .then(|| store.preview_path(scan_id));
            return Ok(ScanStatusView::completed_from_artifacts(
                scan_id.clone(),
                store.result_path(scan_id),
                preview,
            ));
        }

        Err(PipelineError::NotFound(scan_id.clone()))
    }

    /// Stream the full mesh of a completed scan.
    pub async fn fetch(&self, scan_id: &ScanId) -> Result<ReaderStream<File>> {
        match self.status(scan_id).await?.status {
            ScanStatus::Completed => self.inner.store.open_result(scan_id).await,
            _ => Err(PipelineError::NotFound(scan_id.clone())),
        }
    }

    /// Resolve once the scan reaches `Completed` or `Failed`.
    pub async fn wait(&self, scan_id: &ScanId) -> Result<ScanStatusView> {
        let Some(mut rx) = self.inner.registry.watch(scan_id) else {
            return self.status(scan_id).await;
        };
        let scan = rx
            .wait_for(|scan| scan.status.is_terminal())
            .await
            .map_err(|_| {
                PipelineError::Internal(format!("scan {scan_id} record dropped"))
            })?;
        Ok(scan.view())
    }

    async fn drive(self, scan_id: ScanId) {
        let permit = match Arc::clone(&self.inner.permits).acquire_owned().await
        {
            Ok(permit) => permit,
            Err(err) => {
                self.record_failure(
                    &scan_id,
                    PipelineError::Internal(format!("scheduler closed: {err}")),
                );
                return;
            }
        };

        // A separate task so a panic anywhere in the run surfaces as a
        // JoinError here instead of leaving the scan in Processing.
        let run = tokio::spawn(self.clone().run(scan_id.clone()));
        if let Err(err) = run.await.unwrap_or_else(|err| Err(join_error(err))) {
            self.record_failure(&scan_id, err);
        }
        drop(permit);
    }

    /// Completion is recorded as soon as the artifacts are stored; failures
    /// are left to the caller once the working set is gone.
    async fn run(self, scan_id: ScanId) -> Result<()> {
        let scan = self
            .inner
            .registry
            .update(&scan_id, |scan| scan.begin_processing())?;
        self.publish(&scan_id, ScanEventKind::StatusChanged {
            status: ScanStatus::Processing,
        });
        info!(scan_id = %scan_id, "scan processing");

        let working_set =
            WorkingSet::open(self.inner.config.storage.work_root(), &scan_id)
                .await?;
        debug!(scan_id = %scan_id, root = %working_set.root().display(), "working set created");

        let result = self.run_stages(&scan_id, scan.images, &working_set).await;
        if let Ok(stored) = &result {
            self.record_success(&scan_id, stored);
        }

        let root = working_set.root().to_path_buf();
        if let Err(err) = working_set.discard().await {
            warn!(
                scan_id = %scan_id,
                root = %root.display(),
                error = %err,
                "failed to remove working set"
            );
        }
        result.map(|_| ())
    }

    async fn run_stages(
        &self,
        scan_id: &ScanId,
        images: Vec<PathBuf>,
        working_set: &WorkingSet,
    ) -> Result<StoredArtifacts> {
        let inner = &self.inner;

        let preprocessor = inner.preprocessor.clone();
        let images_dir = working_set.images_dir();
        let report = self
            .stage(scan_id, PipelineStage::Preprocessing, blocking(move || {
                preprocessor.prepare(&images, &images_dir)
            }))
            .await?;
        info!(
            scan_id = %scan_id,
            prepared = report.images.len(),
            skipped = report.skipped.len(),
            "images prepared"
        );

        for stage in PipelineStage::ALL.into_iter().filter(|s| s.is_external()) {
            self.stage(
                scan_id,
                stage,
                reconstruction::run_stage(inner.tool.as_ref(), stage, working_set),
            )
            .await?;
        }

        let extractor = inner.extractor.clone();
        let sparse_dir = working_set.sparse_dir();
        let cloud = self
            .stage(scan_id, PipelineStage::PointCloud, blocking(move || {
                Ok(extractor.extract(&sparse_dir))
            }))
            .await?;

        let builder = inner.mesh_builder.clone();
        let (result, preview) = self
            .stage(scan_id, PipelineStage::Meshing, blocking(move || {
                let meshes = builder.build(&cloud)?;
                let preview = export::encode_glb(&meshes.preview)?;
                Ok((export::encode_stl(&meshes.full), preview))
            }))
            .await?;

        self.stage(
            scan_id,
            PipelineStage::Storing,
            inner.store.persist(scan_id, &result, &preview),
        )
        .await
    }

    /// Record `stage` on the scan, run `work` and report its timing.
    async fn stage<T, F>(
        &self,
        scan_id: &ScanId,
        stage: PipelineStage,
        work: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.inner
            .registry
            .update(scan_id, |scan| scan.enter_stage(stage))?;
        self.publish(scan_id, ScanEventKind::StageStarted { stage });
        info!(scan_id = %scan_id, %stage, "stage started");

        let started = Instant::now();
        let result = work.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                self.publish(scan_id, ScanEventKind::StageFinished {
                    stage,
                    elapsed_ms,
                });
                info!(scan_id = %scan_id, %stage, elapsed_ms, "stage finished");
            }
            Err(err) => {
                warn!(scan_id = %scan_id, %stage, elapsed_ms, error = %err, "stage failed");
            }
        }
        result
    }

    fn record_success(&self, scan_id: &ScanId, stored: &StoredArtifacts) {
        let outcome = self.inner.registry.update(scan_id, |scan| {
            scan.complete(stored.result.clone(), stored.preview.clone())
        });
        match outcome {
            Ok(_) => {
                self.publish(scan_id, ScanEventKind::StatusChanged {
                    status: ScanStatus::Completed,
                });
                info!(
                    scan_id = %scan_id,
                    result = %stored.result.display(),
                    "scan completed"
                );
            }
            Err(err) => {
                error!(scan_id = %scan_id, error = %err, "failed to record completion");
            }
        }
    }

    fn record_failure(&self, scan_id: &ScanId, err: PipelineError) {
        let kind = err.kind();
        let detail = err.to_string();
        let outcome = self.inner.registry.update(scan_id, |scan| {
            let stage = err.stage().or(scan.stage);
            scan.fail(ScanFailure::new(kind, stage, detail.clone()))
        });
        match outcome {
            Ok(scan) => {
                self.publish(scan_id, ScanEventKind::StatusChanged {
                    status: ScanStatus::Failed,
                });
                let stage = scan
                    .failure
                    .as_ref()
                    .and_then(|failure| failure.stage)
                    .map(|stage| stage.as_str())
                    .unwrap_or("none");
                error!(scan_id = %scan_id, %kind, stage, error = %detail, "scan failed");
            }
            Err(record_err) => {
                error!(
                    scan_id = %scan_id,
                    error = %detail,
                    record_error = %record_err,
                    "failed to record scan failure"
                );
            }
        }
    }

    fn publish(&self, scan_id: &ScanId, kind: ScanEventKind) {
        self.inner
            .events
            .publish(ScanEvent::new(scan_id.clone(), kind));
    }
}

/// Run CPU-bound work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .unwrap_or_else(|err| Err(join_error(err)))
}

fn join_error(err: JoinError) -> PipelineError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        PipelineError::Internal(format!("pipeline panicked: {message}"))
    } else {
        PipelineError::Internal(format!("pipeline task cancelled: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use footscan_model::FailureKind;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    use super::*;
    use crate::reconstruction::MockReconstructionTool;

    struct Fixture {
        dir: TempDir,
        images: Vec<PathBuf>,
    }

    impl Fixture {
        fn new(count: usize) -> Self {
            let dir = TempDir::new().unwrap();
            let uploads = dir.path().join("uploads");
            std::fs::create_dir_all(&uploads).unwrap();
            let images = (0..count)
                .map(|i| {
                    let path = uploads.join(format!("photo_{i}.png"));
                    RgbImage::from_fn(64, 48, |x, y| {
                        Rgb([(x * 4) as u8, (y * 5) as u8, (i * 40) as u8])
                    })
                    .save(&path)
                    .unwrap();
                    path
                })
                .collect();
            Self { dir, images }
        }

        fn config(&self) -> PipelineConfig {
            let mut config = PipelineConfig::default();
            config.storage.results_dir = self.dir.path().join("results");
            config.storage.work_dir = Some(self.dir.path().join("work"));
            config
        }

        fn work_dir(&self) -> PathBuf {
            self.dir.path().join("work")
        }
    }

    fn write_cube_model(sparse: &Path) -> std::io::Result<()> {
        let model = sparse.join("0");
        std::fs::create_dir_all(&model)?;
        let mut text = String::from("# POINT3D_ID X Y Z R G B ERROR TRACK\n");
        let mut id = 1;
        for x in [0.0, 0.1] {
            for y in [0.0, 0.25] {
                for z in [0.0, 0.08] {
                    text.push_str(&format!("{id} {x} {y} {z} 200 180 170 0.4 1 0\n"));
                    id += 1;
                }
            }
        }
        std::fs::write(model.join("points3D.txt"), text)
    }

    fn succeeding_tool() -> MockReconstructionTool {
        let mut tool = MockReconstructionTool::new();
        tool.expect_extract().returning(|ws| {
            std::fs::write(ws.database_path(), b"features")?;
            Ok(())
        });
        tool.expect_match_features().returning(|_| Ok(()));
        tool.expect_map().returning(|ws| {
            write_cube_model(&ws.sparse_dir())?;
            Ok(())
        });
        tool
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    async fn until_empty(path: &Path) {
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while !is_empty_dir(path) {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("working set removed in time");
    }

    #[tokio::test]
    async fn completes_and_reports_every_stage() {
        let fixture = Fixture::new(3);
        let orchestrator =
            Orchestrator::new(fixture.config(), Arc::new(succeeding_tool()));
        let mut events = orchestrator.subscribe();
        let id = ScanId::parse("cube").unwrap();

        let ack = orchestrator
            .submit(id.clone(), fixture.images.clone())
            .await
            .unwrap();
        assert_eq!(ack.status, ScanStatus::Uploading);
        assert_eq!(ack.accepted_images, 3);

        let view = orchestrator.wait(&id).await.unwrap();
        assert_eq!(view.status, ScanStatus::Completed, "{:?}", view.error);
        assert!(view.result_ref.unwrap().is_file());
        assert!(view.preview_ref.unwrap().is_file());
        until_empty(&fixture.work_dir()).await;

        // The terminal event follows the state change it reports.
        let mut started = Vec::new();
        let mut statuses = Vec::new();
        while statuses.last() != Some(&ScanStatus::Completed) {
            let event = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                events.recv(),
            )
            .await
            .unwrap()
            .unwrap();
            match event.kind {
                ScanEventKind::StageStarted { stage } => started.push(stage),
                ScanEventKind::StatusChanged { status } => statuses.push(status),
                ScanEventKind::StageFinished { .. } => {}
            }
        }
        assert_eq!(started, PipelineStage::ALL.to_vec());
        assert_eq!(statuses, vec![
            ScanStatus::Uploading,
            ScanStatus::Processing,
            ScanStatus::Completed,
        ]);
    }

    #[tokio::test]
    async fn mapping_failure_is_recorded_with_its_stage() {
        let fixture = Fixture::new(2);
        let mut tool = MockReconstructionTool::new();
        tool.expect_extract().returning(|ws| {
            std::fs::write(ws.database_path(), b"features")?;
            Ok(())
        });
        tool.expect_match_features().returning(|_| Ok(()));
        tool.expect_map().returning(|_| {
            Err(PipelineError::tool(
                PipelineStage::Mapping,
                crate::error::ToolOutcome::Exit(1),
            ))
        });
        let orchestrator = Orchestrator::new(fixture.config(), Arc::new(tool));
        let id = ScanId::parse("unmappable").unwrap();

        orchestrator.submit(id.clone(), fixture.images.clone()).await.unwrap();
        let view = orchestrator.wait(&id).await.unwrap();

        assert_eq!(view.status, ScanStatus::Failed);
        let failure = view.error.unwrap();
        assert_eq!(failure.kind, FailureKind::ToolInvocationError);
        assert_eq!(failure.stage, Some(PipelineStage::Mapping));
        assert!(!orchestrator.artifacts().has_result(&id).await);
        assert!(is_empty_dir(&fixture.work_dir()));
    }

    #[tokio::test]
    async fn empty_model_is_a_geometry_failure_at_meshing() {
        let fixture = Fixture::new(2);
        let mut tool = MockReconstructionTool::new();
        tool.expect_extract().returning(|ws| {
            std::fs::write(ws.database_path(), b"features")?;
            Ok(())
        });
        tool.expect_match_features().returning(|_| Ok(()));
        tool.expect_map().returning(|_| Ok(()));
        let orchestrator = Orchestrator::new(fixture.config(), Arc::new(tool));
        let id = ScanId::parse("empty-model").unwrap();

        orchestrator.submit(id.clone(), fixture.images.clone()).await.unwrap();
        let view = orchestrator.wait(&id).await.unwrap();

        let failure = view.error.unwrap();
        assert_eq!(failure.kind, FailureKind::GeometryError);
        assert_eq!(failure.stage, Some(PipelineStage::Meshing));
    }

    struct Exploding;

    #[async_trait::async_trait]
    impl ReconstructionTool for Exploding {
        async fn extract(&self, _: &WorkingSet) -> Result<()> {
            panic!("feature extractor exploded")
        }

        async fn match_features(&self, _: &WorkingSet) -> Result<()> {
            Ok(())
        }

        async fn map(&self, _: &WorkingSet) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_tool_fails_the_scan() {
        let fixture = Fixture::new(1);
        let orchestrator = Orchestrator::new(fixture.config(), Arc::new(Exploding));
        let id = ScanId::parse("panics").unwrap();

        orchestrator.submit(id.clone(), fixture.images.clone()).await.unwrap();
        let view = orchestrator.wait(&id).await.unwrap();

        let failure = view.error.unwrap();
        assert_eq!(failure.kind, FailureKind::InternalError);
        assert_eq!(failure.stage, Some(PipelineStage::FeatureExtraction));
        assert!(failure.detail.contains("feature extractor exploded"));
    }

    #[tokio::test]
    async fn unknown_scans_are_not_found() {
        let fixture = Fixture::new(0);
        let orchestrator = Orchestrator::new(
            fixture.config(),
            Arc::new(MockReconstructionTool::new()),
        );
        let id = ScanId::parse("nobody").unwrap();

        assert!(matches!(
            orchestrator.status(&id).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.fetch(&id).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            orchestrator.wait(&id).await,
            Err(PipelineError::NotFound(_))
        ));
    }
}
