//! # FootScan Core
//!
//! Turns a batch of photographs of a foot into a downloadable surface mesh.
//!
//! ## Overview
//!
//! Each scan runs through a fixed sequence of stages:
//!
//! - **Preprocessing**: bounded decode, size clamp and optional contrast
//!   boost of the uploaded photos into a per-scan working set
//! - **Reconstruction**: feature extraction, exhaustive matching and sparse
//!   mapping, delegated to an external structure-from-motion tool (COLMAP)
//! - **Point cloud**: the largest sparse model read back into memory
//! - **Meshing**: convex hull, base flattening and a decimated preview
//! - **Storing**: atomic placement of `<id>.stl` and `<id>_preview.glb`
//!
//! ## Architecture
//!
//! - [`orchestration`]: the [`Orchestrator`], per-scan state and events
//! - [`preprocess`]: image normalization
//! - [`reconstruction`]: the [`ReconstructionTool`] seam and [`ColmapTool`]
//! - [`point_cloud`]: COLMAP model parsing
//! - [`mesh`]: surface derivation, decimation and encoders
//! - [`artifacts`]: the result directory
//!
//! ## Examples
//!
//! ```no_run
//! use footscan_core::{Orchestrator, PipelineConfig};
//! use footscan_model::ScanId;
//!
//! async fn scan_photos(
//!     photos: Vec<std::path::PathBuf>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::with_colmap(PipelineConfig::default());
//!     let id = ScanId::generate();
//!     orchestrator.submit(id.clone(), photos).await?;
//!     let status = orchestrator.wait(&id).await?;
//!     println!("{id}: {}", status.status);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Result directory and atomic artifact placement
pub mod artifacts;

/// Pipeline configuration with per-section defaults
pub mod config;

/// Error types and the failure taxonomy mapping
pub mod error;

/// Triangle meshes, hull construction and export
pub mod mesh;

/// Scan state machine, scheduling and progress events
pub mod orchestration;

/// Sparse point clouds from the reconstruction output
pub mod point_cloud;

/// Image normalization ahead of reconstruction
pub mod preprocess;

/// External structure-from-motion invocation
pub mod reconstruction;

/// Per-scan ephemeral directories
pub mod working_set;

pub use artifacts::{ArtifactStore, StoredArtifacts};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result, ToolOutcome};
pub use orchestration::{Orchestrator, ScanEvent, ScanEventKind, SubmitAck};
pub use reconstruction::{ColmapTool, ReconstructionTool};
pub use working_set::WorkingSet;
