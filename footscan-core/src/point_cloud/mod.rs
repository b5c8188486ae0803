//! Sparse point clouds read back from the reconstruction toolchain.

use std::path::{Path, PathBuf};

use nalgebra::Point3;
use tracing::{debug, warn};

mod colmap;

pub use colmap::{SparsePoint, parse_points_bin, parse_points_text};

/// Ordered 3D coordinates with no implied connectivity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3<f64>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<Point3<f64>> {
        self.points
    }
}

const POINTS_BIN: &str = "points3D.bin";
const POINTS_TXT: &str = "points3D.txt";

/// Reads the mapper's output model into a [`PointCloud`].
///
/// Extraction never fails: a missing, empty or malformed model yields an
/// empty cloud, and the mesh builder reports that as degenerate geometry.
#[derive(Debug, Clone, Default)]
pub struct PointCloudExtractor {
    max_reprojection_error: Option<f64>,
}

impl PointCloudExtractor {
    pub fn new(max_reprojection_error: Option<f64>) -> Self {
        Self {
            max_reprojection_error,
        }
    }

    /// `sparse_root` is either the mapper output directory holding numbered
    /// sub-models, or a single model directory.
    pub fn extract(&self, sparse_root: &Path) -> PointCloud {
        let mut best = PointCloud::default();
        for model in model_dirs(sparse_root) {
            let cloud = self.read_model(&model);
            debug!(
                model = %model.display(),
                points = cloud.len(),
                "read sparse model"
            );
            if cloud.len() > best.len() {
                best = cloud;
            }
        }
        best
    }

    fn read_model(&self, dir: &Path) -> PointCloud {
        let bin = dir.join(POINTS_BIN);
        let txt = dir.join(POINTS_TXT);

        let parsed = if bin.is_file() {
            std::fs::read(&bin)
                .map_err(|err| err.to_string())
                .and_then(|bytes| parse_points_bin(&bytes))
        } else if txt.is_file() {
            std::fs::read_to_string(&txt)
                .map_err(|err| err.to_string())
                .and_then(|text| parse_points_text(&text))
        } else {
            return PointCloud::default();
        };

        match parsed {
            Ok(points) => self.filter(points),
            Err(reason) => {
                warn!(
                    model = %dir.display(),
                    %reason,
                    "ignoring malformed sparse model"
                );
                PointCloud::default()
            }
        }
    }

    fn filter(&self, points: Vec<SparsePoint>) -> PointCloud {
        let limit = self.max_reprojection_error;
        PointCloud::new(
            points
                .into_iter()
                .filter(|p| p.position.coords.iter().all(|c| c.is_finite()))
                .filter(|p| limit.is_none_or(|max| p.error <= max))
                .map(|p| p.position)
                .collect(),
        )
    }
}

/// The root itself when it holds a model, otherwise its immediate
/// subdirectories in name order.
fn model_dirs(root: &Path) -> Vec<PathBuf> {
    if root.join(POINTS_BIN).is_file() || root.join(POINTS_TXT).is_file() {
        return vec![root.to_path_buf()];
    }

    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}
