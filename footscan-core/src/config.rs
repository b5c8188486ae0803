use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mesh::UpAxis;

/// Global knobs that tune the scan pipeline.
///
/// All fields carry defaults so a deployment can override a single section
/// without supplying a full configuration payload.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where artifacts land and where per-scan working sets are created.
    pub storage: StorageConfig,
    /// Image normalization before reconstruction.
    pub preprocess: PreprocessConfig,
    /// External structure-from-motion toolchain invocation.
    pub reconstruction: ReconstructionConfig,
    /// Surface derivation, base flattening and preview decimation.
    pub mesh: MeshConfig,
    /// Scan-level concurrency and event fan-out.
    pub orchestrator: OrchestratorSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Results root shared by every scan. Files are keyed by scan id.
    pub results_dir: PathBuf,
    /// Parent for per-scan working sets; the system temp dir when unset.
    pub work_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("storage/results"),
            work_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn work_root(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Longest allowed side after normalization.
    pub max_dimension: u32,
    /// Apply a contrast boost before writing.
    pub enhance_contrast: bool,
    /// Contrast adjustment passed to the image crate (positive increases).
    pub contrast_amount: f32,
    pub jpeg_quality: u8,
    /// Decoder bounds; anything larger counts as an undecodable image.
    pub max_decode_dimension: u32,
    pub max_decode_alloc_bytes: u64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_dimension: 2000,
            enhance_contrast: false,
            contrast_amount: 20.0,
            jpeg_quality: 95,
            max_decode_dimension: 16_384,
            max_decode_alloc_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Path to the COLMAP binary.
    pub colmap_path: String,
    pub use_gpu: bool,
    /// Treat every photo as coming from the same camera.
    pub single_camera: bool,
    /// Wall-clock limit for each external stage (seconds).
    pub stage_timeout_secs: u64,
    /// Number of trailing stderr lines kept for diagnostics.
    pub stderr_tail_lines: usize,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            colmap_path: "colmap".to_string(),
            use_gpu: true,
            single_camera: true,
            stage_timeout_secs: 60 * 60,
            stderr_tail_lines: 20,
        }
    }
}

impl ReconstructionConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub up_axis: UpAxis,
    /// Vertices this close to the lowest point are snapped onto it.
    pub base_flatten_tolerance: f64,
    pub preview_target_faces: usize,
    /// Drop sparse points whose mean reprojection error exceeds this.
    pub max_reprojection_error: Option<f64>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            up_axis: UpAxis::Z,
            base_flatten_tolerance: 0.01,
            preview_target_faces: 5000,
            max_reprojection_error: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Scans allowed past `Uploading` at the same time.
    pub max_concurrent_scans: usize,
    /// Buffered events per subscriber before slow observers start lagging.
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_scans: 2,
            event_channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{ "mesh": { "preview_target_faces": 1200 },
                 "reconstruction": { "use_gpu": false } }"#,
        )
        .unwrap();
        assert_eq!(cfg.mesh.preview_target_faces, 1200);
        assert_eq!(cfg.mesh.base_flatten_tolerance, 0.01);
        assert!(!cfg.reconstruction.use_gpu);
        assert_eq!(cfg.reconstruction.colmap_path, "colmap");
        assert_eq!(cfg.preprocess.max_dimension, 2000);
    }
}
