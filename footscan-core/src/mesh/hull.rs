//! Incremental 3D convex hull.

use std::collections::HashSet;

use nalgebra::{Point3, Vector3};

use super::{Mesh, SurfaceReconstructor, bounds_of};
use crate::error::{PipelineError, Result};
use crate::point_cloud::PointCloud;

/// Relative tolerance, scaled by the cloud's extent.
const RELATIVE_EPSILON: f64 = 1e-9;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConvexHullReconstructor;

impl SurfaceReconstructor for ConvexHullReconstructor {
    fn name(&self) -> &'static str {
        "convex-hull"
    }

    fn reconstruct(&self, cloud: &PointCloud) -> Result<Mesh> {
        convex_hull(cloud.points())
    }
}

#[derive(Debug, Clone)]
struct Facet {
    v: [usize; 3],
    normal: Vector3<f64>,
    offset: f64,
    alive: bool,
}

impl Facet {
    fn new(points: &[Point3<f64>], v: [usize; 3]) -> Self {
        let [a, b, c] = v.map(|i| points[i]);
        let normal = (b - a)
            .cross(&(c - a))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros);
        Self {
            v,
            normal,
            offset: normal.dot(&a.coords),
            alive: true,
        }
    }

    fn distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) - self.offset
    }

    fn flipped(&self, points: &[Point3<f64>]) -> Self {
        Facet::new(points, [self.v[0], self.v[2], self.v[1]])
    }
}

fn degenerate(reason: impl Into<String>) -> PipelineError {
    PipelineError::Geometry(reason.into())
}

/// Closed convex hull of `points` with outward-facing triangles.
///
/// Fails when the input does not contain four non-coplanar points.
pub fn convex_hull(points: &[Point3<f64>]) -> Result<Mesh> {
    let points: Vec<Point3<f64>> = points
        .iter()
        .copied()
        .filter(|p| p.coords.iter().all(|c| c.is_finite()))
        .collect();

    if points.len() < 4 {
        return Err(degenerate(format!(
            "need at least 4 points for a hull, got {}",
            points.len()
        )));
    }

    let (min, max) =
        bounds_of(&points).ok_or_else(|| degenerate("empty point set"))?;
    let extent = (max - min).amax();
    if extent <= 0.0 {
        return Err(degenerate("all points coincide"));
    }
    let eps = extent * RELATIVE_EPSILON;

    let [i0, i1, i2, i3] = initial_simplex(&points, eps)?;
    let centroid = Point3::from(
        (points[i0].coords
            + points[i1].coords
            + points[i2].coords
            + points[i3].coords)
            / 4.0,
    );

    let mut facets: Vec<Facet> = [[i0, i1, i2], [i0, i3, i1], [i1, i3, i2], [i2, i3, i0]]
        .into_iter()
        .map(|v| {
            let facet = Facet::new(&points, v);
            if facet.distance(&centroid) > 0.0 {
                facet.flipped(&points)
            } else {
                facet
            }
        })
        .collect();

    // Far points first: they carve out most of the hull early so interior
    // points are rejected against fewer facets.
    let mut order: Vec<usize> = (0..points.len())
        .filter(|i| ![i0, i1, i2, i3].contains(i))
        .collect();
    order.sort_by(|&a, &b| {
        let da = (points[a] - centroid).norm_squared();
        let db = (points[b] - centroid).norm_squared();
        db.total_cmp(&da)
    });

    let mut dead = 0usize;
    for idx in order {
        let p = points[idx];
        let visible: Vec<usize> = facets
            .iter()
            .enumerate()
            .filter(|(_, f)| f.alive && f.distance(&p) > eps)
            .map(|(i, _)| i)
            .collect();
        if visible.is_empty() {
            continue;
        }

        let mut edges = HashSet::with_capacity(visible.len() * 3);
        for &fi in &visible {
            let v = facets[fi].v;
            for k in 0..3 {
                edges.insert((v[k], v[(k + 1) % 3]));
            }
        }

        let mut horizon = Vec::new();
        for &fi in &visible {
            let v = facets[fi].v;
            for k in 0..3 {
                let edge = (v[k], v[(k + 1) % 3]);
                if !edges.contains(&(edge.1, edge.0)) {
                    horizon.push(edge);
                }
            }
        }

        for &fi in &visible {
            facets[fi].alive = false;
        }
        dead += visible.len();

        for (a, b) in horizon {
            facets.push(Facet::new(&points, [a, b, idx]));
        }

        if dead > facets.len() / 2 {
            facets.retain(|f| f.alive);
            dead = 0;
        }
    }

    let mut mesh = Mesh::new(
        points,
        facets
            .iter()
            .filter(|f| f.alive)
            .map(|f| f.v.map(|i| i as u32))
            .collect(),
    );
    mesh.compact();
    Ok(mesh)
}

fn initial_simplex(points: &[Point3<f64>], eps: f64) -> Result<[usize; 4]> {
    let i0 = argmax(points, |p| -p.x);
    let a = points[i0];

    let i1 = argmax(points, |p| (p - a).norm_squared());
    let b = points[i1];
    let dir = b - a;
    if dir.norm() <= eps {
        return Err(degenerate("all points coincide"));
    }

    let i2 = argmax(points, |p| (p - a).cross(&dir).norm_squared());
    let c = points[i2];
    let line_dist = (c - a).cross(&dir).norm() / dir.norm();
    if line_dist <= eps {
        return Err(degenerate("all points are collinear"));
    }

    let normal = dir.cross(&(c - a)).normalize();
    let i3 = argmax(points, |p| normal.dot(&(p - a)).abs());
    if normal.dot(&(points[i3] - a)).abs() <= eps {
        return Err(degenerate(
            "fewer than 4 non-coplanar points; cannot enclose a volume",
        ));
    }

    Ok([i0, i1, i2, i3])
}

fn argmax(points: &[Point3<f64>], key: impl Fn(&Point3<f64>) -> f64) -> usize {
    let mut best = 0;
    let mut best_key = f64::NEG_INFINITY;
    for (i, p) in points.iter().enumerate() {
        let k = key(p);
        if k > best_key {
            best = i;
            best_key = k;
        }
    }
    best
}
