use std::fmt;
use std::path::{Path, PathBuf};

use footscan_model::ScanId;
use tempfile::TempDir;

use crate::error::{PipelineError, Result};

const IMAGES_DIR: &str = "images";
const SPARSE_DIR: &str = "sparse";
const DATABASE_FILE: &str = "database.db";

/// Ephemeral per-scan directory holding preprocessed images and the
/// toolchain's intermediate artifacts.
///
/// Owned by exactly one pipeline run. The directory is removed when the
/// value is dropped, whether the run succeeded, failed or panicked.
pub struct WorkingSet {
    dir: TempDir,
}

impl fmt::Debug for WorkingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingSet")
            .field("root", &self.dir.path())
            .finish()
    }
}

impl WorkingSet {
    /// [`WorkingSet::create`] on the blocking pool.
    pub async fn open(parent: PathBuf, scan_id: &ScanId) -> Result<Self> {
        let scan_id = scan_id.clone();
        tokio::task::spawn_blocking(move || Self::create(&parent, &scan_id))
            .await
            .map_err(|err| {
                PipelineError::Internal(format!("working set setup aborted: {err}"))
            })?
    }

    pub fn create(parent: &Path, scan_id: &ScanId) -> Result<Self> {
        std::fs::create_dir_all(parent).map_err(|err| {
            PipelineError::Storage(format!(
                "failed to create work root {}: {err}",
                parent.display()
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{scan_id}-"))
            .tempdir_in(parent)
            .map_err(|err| {
                PipelineError::Storage(format!(
                    "failed to create working set for {scan_id}: {err}"
                ))
            })?;

        for sub in [IMAGES_DIR, SPARSE_DIR] {
            std::fs::create_dir_all(dir.path().join(sub))?;
        }

        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn images_dir(&self) -> PathBuf {
        self.dir.path().join(IMAGES_DIR)
    }

    pub fn sparse_dir(&self) -> PathBuf {
        self.dir.path().join(SPARSE_DIR)
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.path().join(DATABASE_FILE)
    }

    /// Remove the directory now and report failures instead of swallowing
    /// them in `Drop`.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }

    /// [`WorkingSet::close`] on the blocking pool. The directory is removed
    /// even if the caller stops polling.
    pub async fn discard(self) -> std::io::Result<()> {
        tokio::task::spawn_blocking(move || self.close())
            .await
            .map_err(std::io::Error::other)?
    }
}
