//! Surface derivation from a sparse point cloud.
//!
//! Meshes are flat buffers: a vertex array plus triangles indexing into it.

use std::fmt;
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MeshConfig;
use crate::error::{PipelineError, Result};
use crate::point_cloud::PointCloud;

pub mod decimate;
pub mod export;
pub mod flatten;
pub mod hull;

pub use decimate::decimate;
pub use flatten::flatten_base;
pub use hull::{ConvexHullReconstructor, convex_hull};

/// Axis treated as "up" when flattening the contact surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpAxis {
    X,
    Y,
    Z,
}

impl UpAxis {
    pub fn index(&self) -> usize {
        match self {
            UpAxis::X => 0,
            UpAxis::Y => 1,
            UpAxis::Z => 2,
        }
    }
}

/// Triangle mesh with counter-clockwise (outward) winding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(vertices: Vec<Point3<f64>>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Axis-aligned bounds of the vertex set.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        bounds_of(&self.vertices)
    }

    /// Unit normal of a face; zero for degenerate triangles.
    pub fn face_normal(&self, face: usize) -> Vector3<f64> {
        let [a, b, c] = self.faces[face].map(|i| self.vertices[i as usize]);
        (b - a)
            .cross(&(c - a))
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(Vector3::zeros)
    }

    /// Drop vertices that no face references, preserving relative order.
    pub fn compact(&mut self) {
        let mut remap = vec![u32::MAX; self.vertices.len()];
        for face in &self.faces {
            for &v in face {
                remap[v as usize] = 0;
            }
        }

        let mut vertices = Vec::with_capacity(self.vertices.len());
        for (old, slot) in remap.iter_mut().enumerate() {
            if *slot == 0 {
                *slot = vertices.len() as u32;
                vertices.push(self.vertices[old]);
            }
        }

        for face in &mut self.faces {
            *face = face.map(|v| remap[v as usize]);
        }
        self.vertices = vertices;
    }
}

pub(crate) fn bounds_of(
    points: &[Point3<f64>],
) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = points.first()?;
    let mut min = *first;
    let mut max = *first;
    for p in points {
        min = min.inf(p);
        max = max.sup(p);
    }
    Some((min, max))
}

/// Turns a point cloud into a surface. The pipeline ships a convex hull;
/// denser reconstructions plug in here.
pub trait SurfaceReconstructor: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn reconstruct(&self, cloud: &PointCloud) -> Result<Mesh>;
}

/// Full-resolution mesh and its decimated preview.
#[derive(Debug, Clone)]
pub struct BuiltMeshes {
    pub full: Mesh,
    pub preview: Mesh,
}

#[derive(Debug, Clone)]
pub struct MeshBuilder {
    reconstructor: Arc<dyn SurfaceReconstructor>,
    config: MeshConfig,
}

impl MeshBuilder {
    pub fn new(config: MeshConfig) -> Self {
        Self::with_reconstructor(config, Arc::new(ConvexHullReconstructor))
    }

    pub fn with_reconstructor(
        config: MeshConfig,
        reconstructor: Arc<dyn SurfaceReconstructor>,
    ) -> Self {
        Self {
            reconstructor,
            config,
        }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn build(&self, cloud: &PointCloud) -> Result<BuiltMeshes> {
        if cloud.is_empty() {
            return Err(PipelineError::Geometry(
                "sparse reconstruction produced no points".into(),
            ));
        }

        let mut full = self.reconstructor.reconstruct(cloud)?;
        if full.is_empty() {
            return Err(PipelineError::Geometry(format!(
                "{} produced an empty surface",
                self.reconstructor.name()
            )));
        }

        let snapped = flatten_base(
            &mut full,
            self.config.up_axis,
            self.config.base_flatten_tolerance,
        );
        let preview = decimate(&full, self.config.preview_target_faces);

        debug!(
            reconstructor = self.reconstructor.name(),
            points = cloud.len(),
            vertices = full.num_vertices(),
            faces = full.num_faces(),
            preview_faces = preview.num_faces(),
            snapped,
            "built meshes"
        );

        Ok(BuiltMeshes { full, preview })
    }
}
