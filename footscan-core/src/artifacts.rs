use std::io;
use std::path::{Path, PathBuf};

use footscan_model::ScanId;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Paths of a scan's persisted meshes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifacts {
    pub result: PathBuf,
    pub preview: PathBuf,
}

/// Result directory shared by every scan; each file is keyed by scan id.
///
/// The full mesh is the completion marker: it is always the last file to
/// appear under its final name, and only after the preview is in place.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn result_path(&self, scan_id: &ScanId) -> PathBuf {
        self.root.join(format!("{scan_id}.stl"))
    }

    pub fn preview_path(&self, scan_id: &ScanId) -> PathBuf {
        self.root.join(format!("{scan_id}_preview.glb"))
    }

    pub async fn has_result(&self, scan_id: &ScanId) -> bool {
        is_file(&self.result_path(scan_id)).await
    }

    pub async fn has_preview(&self, scan_id: &ScanId) -> bool {
        is_file(&self.preview_path(scan_id)).await
    }

    /// Write both meshes so that either both final paths exist or neither
    /// does.
    pub async fn persist(
        &self,
        scan_id: &ScanId,
        result: &[u8],
        preview: &[u8],
    ) -> Result<StoredArtifacts> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|err| {
            storage_error("create results directory", &self.root, err)
        })?;

        let final_result = self.result_path(scan_id);
        let final_preview = self.preview_path(scan_id);
        let tmp_result = self.temp_path(scan_id, "stl");
        let tmp_preview = self.temp_path(scan_id, "glb");

        let staged = async {
            write_synced(&tmp_preview, preview).await?;
            write_synced(&tmp_result, result).await
        }
        .await;
        if let Err(err) = staged {
            discard(&tmp_preview).await;
            discard(&tmp_result).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_preview, &final_preview).await {
            discard(&tmp_preview).await;
            discard(&tmp_result).await;
            return Err(storage_error("place preview", &final_preview, err));
        }

        if let Err(err) = tokio::fs::rename(&tmp_result, &final_result).await {
            discard(&tmp_result).await;
            discard(&final_preview).await;
            return Err(storage_error("place result", &final_result, err));
        }

        debug!(
            scan_id = %scan_id,
            result = %final_result.display(),
            bytes = result.len(),
            preview_bytes = preview.len(),
            "artifacts persisted"
        );

        Ok(StoredArtifacts {
            result: final_result,
            preview: final_preview,
        })
    }

    /// Stream the persisted full mesh.
    pub async fn open_result(
        &self,
        scan_id: &ScanId,
    ) -> Result<ReaderStream<File>> {
        let path = self.result_path(scan_id);
        match File::open(&path).await {
            Ok(file) => Ok(ReaderStream::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(PipelineError::NotFound(scan_id.clone()))
            }
            Err(err) => Err(storage_error("open result", &path, err)),
        }
    }

    fn temp_path(&self, scan_id: &ScanId, ext: &str) -> PathBuf {
        self.root.join(format!(
            ".{scan_id}.{ext}.tmp-{}",
            Uuid::new_v4().simple()
        ))
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .await
        .map_err(|err| storage_error("create temp artifact", path, err))?;
    file.write_all(bytes)
        .await
        .map_err(|err| storage_error("write temp artifact", path, err))?;
    file.flush()
        .await
        .map_err(|err| storage_error("flush temp artifact", path, err))?;
    file.sync_all()
        .await
        .map_err(|err| storage_error("sync temp artifact", path, err))?;
    Ok(())
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to remove artifact");
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn storage_error(action: &str, path: &Path, err: io::Error) -> PipelineError {
    PipelineError::Storage(format!("failed to {action} {}: {err}", path.display()))
}
