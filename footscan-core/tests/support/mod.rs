#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use footscan_core::error::{PipelineError, Result, ToolOutcome};
use footscan_core::{PipelineConfig, ReconstructionTool, WorkingSet};
use footscan_model::PipelineStage;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// In-process stand-in for COLMAP.
///
/// Writes the artifacts the real tool would leave behind: a feature
/// database and a sparse model shaped roughly like a foot.
#[derive(Clone)]
pub struct FakeTool {
    points: usize,
    failure: Arc<Mutex<Option<(PipelineStage, i32)>>>,
    gate: Option<Arc<Semaphore>>,
    clutter: usize,
    calls: Arc<Mutex<Vec<PipelineStage>>>,
}

impl FakeTool {
    pub fn new(points: usize) -> Self {
        Self {
            points,
            failure: Arc::new(Mutex::new(None)),
            gate: None,
            clutter: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Exit with `code` when `stage` runs, until [`FakeTool::heal`].
    pub fn failing_at(self, stage: PipelineStage, code: i32) -> Self {
        *self.failure.lock().expect("failure lock") = Some((stage, code));
        self
    }

    /// Hold extraction until the test adds permits to the returned gate.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Leave `files` scratch files in the working set after mapping, so
    /// removing it takes a while.
    pub fn cluttered(mut self, files: usize) -> Self {
        self.clutter = files;
        self
    }

    pub fn heal(&self) {
        *self.failure.lock().expect("failure lock") = None;
    }

    pub fn calls(&self) -> Vec<PipelineStage> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn enter(&self, stage: PipelineStage) -> Result<()> {
        self.calls.lock().expect("calls lock").push(stage);
        match *self.failure.lock().expect("failure lock") {
            Some((failing, code)) if failing == stage => {
                Err(PipelineError::tool(stage, ToolOutcome::Exit(code)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ReconstructionTool for FakeTool {
    async fn extract(&self, working_set: &WorkingSet) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|err| PipelineError::Internal(err.to_string()))?
                .forget();
        }
        self.enter(PipelineStage::FeatureExtraction)?;
        let images = std::fs::read_dir(working_set.images_dir())?.count();
        std::fs::write(
            working_set.database_path(),
            format!("features for {images} images"),
        )?;
        Ok(())
    }

    async fn match_features(&self, _working_set: &WorkingSet) -> Result<()> {
        self.enter(PipelineStage::FeatureMatching)
    }

    async fn map(&self, working_set: &WorkingSet) -> Result<()> {
        self.enter(PipelineStage::Mapping)?;
        let sparse = working_set.sparse_dir();
        write_model(&sparse.join("0"), &foot_cloud(self.points, 7))?;
        // A smaller disconnected fragment, as the mapper sometimes emits.
        write_model(&sparse.join("1"), &foot_cloud(self.points / 10, 11))?;

        if self.clutter > 0 {
            let scratch = working_set.root().join("scratch");
            std::fs::create_dir_all(&scratch)?;
            for i in 0..self.clutter {
                std::fs::write(scratch.join(format!("tile-{i:06}")), b"tile")?;
            }
        }
        Ok(())
    }
}

/// Points on an ellipsoid about a foot's size, resting on z = 0.
pub fn foot_cloud(count: usize, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (a, b, c) = (0.13, 0.05, 0.04);
    (0..count)
        .map(|_| {
            let theta = rng.random::<f64>() * std::f64::consts::TAU;
            let phi = (rng.random::<f64>() * 2.0 - 1.0).acos();
            [
                a * phi.sin() * theta.cos(),
                b * phi.sin() * theta.sin(),
                c * (1.0 + phi.cos()),
            ]
        })
        .collect()
}

fn write_model(dir: &Path, points: &[[f64; 3]]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut text = String::from(
        "# 3D point list with one line of data per point:\n\
         #   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)\n",
    );
    for (id, [x, y, z]) in points.iter().enumerate() {
        text.push_str(&format!("{} {x} {y} {z} 210 180 160 0.6 1 3 2 9\n", id + 1));
    }
    std::fs::write(dir.join("points3D.txt"), text)
}

/// Temp layout for one test: uploads, results and working sets.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("sandbox"),
        }
    }

    pub fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.storage.results_dir = self.results_dir();
        config.storage.work_dir = Some(self.work_dir());
        config
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Synthetic photographs with a little structure in them.
    pub fn photos(&self, prefix: &str, count: usize) -> Vec<PathBuf> {
        let uploads = self.dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        (0..count)
            .map(|i| {
                let path = uploads.join(format!("{prefix}_{i}.png"));
                RgbImage::from_fn(120, 80, |x, y| {
                    let shade = ((x / 8 + y / 8 + i as u32) % 2) as u8 * 180;
                    Rgb([shade, 90, 255 - shade])
                })
                .save(&path)
                .expect("write photo");
                path
            })
            .collect()
    }

    /// Files that are not images at all.
    pub fn garbage(&self, count: usize) -> Vec<PathBuf> {
        let uploads = self.dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        (0..count)
            .map(|i| {
                let path = uploads.join(format!("broken_{i}.jpg"));
                std::fs::write(&path, b"definitely not a jpeg").expect("write");
                path
            })
            .collect()
    }

    pub fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.work_dir())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    /// Working sets are removed after the scan reports its outcome.
    pub async fn until_work_dir_empty(&self) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while !self.work_dir_is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("working sets removed in time");
    }
}
