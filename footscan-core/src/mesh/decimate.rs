//! Face-count reduction by uniform vertex clustering.

use std::collections::{HashMap, HashSet};

use nalgebra::{Point3, Vector3};

use super::Mesh;

/// Growth factor applied to the cell size between clustering passes.
const CELL_GROWTH: f64 = 1.25;

/// Reduce `mesh` to at most `target_faces` faces.
///
/// A target at or above the current face count returns the mesh unchanged.
/// Each clustering pass can only merge or drop faces, so the result never
/// has more faces than the input.
pub fn decimate(mesh: &Mesh, target_faces: usize) -> Mesh {
    if mesh.num_faces() <= target_faces {
        return mesh.clone();
    }

    let Some((min, max)) = mesh.bounds() else {
        return mesh.clone();
    };
    let extent = (max - min).amax();
    if !extent.is_finite() || extent <= 0.0 {
        return Mesh::default();
    }

    // A closed surface with n faces spans roughly sqrt(n) cells per side.
    let mut cell = extent / (target_faces.max(1) as f64).sqrt();
    loop {
        let candidate = cluster(mesh, &min, cell);
        if candidate.num_faces() <= target_faces || cell > extent * 2.0 {
            return candidate;
        }
        cell *= CELL_GROWTH;
    }
}

fn cluster(mesh: &Mesh, origin: &Point3<f64>, cell: f64) -> Mesh {
    let mut cells: HashMap<(i64, i64, i64), u32> = HashMap::new();
    let mut sums: Vec<(Vector3<f64>, u32)> = Vec::new();
    let mut remap = Vec::with_capacity(mesh.num_vertices());

    for v in &mesh.vertices {
        let key = (
            ((v.x - origin.x) / cell).floor() as i64,
            ((v.y - origin.y) / cell).floor() as i64,
            ((v.z - origin.z) / cell).floor() as i64,
        );
        let id = *cells.entry(key).or_insert_with(|| {
            sums.push((Vector3::zeros(), 0));
            (sums.len() - 1) as u32
        });
        let (sum, count) = &mut sums[id as usize];
        *sum += v.coords;
        *count += 1;
        remap.push(id);
    }

    let vertices = sums
        .iter()
        .map(|(sum, count)| Point3::from(sum / *count as f64))
        .collect();

    let mut seen = HashSet::new();
    let mut faces = Vec::new();
    for face in &mesh.faces {
        let f = face.map(|v| remap[v as usize]);
        if f[0] == f[1] || f[1] == f[2] || f[2] == f[0] {
            continue;
        }
        let mut key = f;
        key.sort_unstable();
        if seen.insert(key) {
            faces.push(f);
        }
    }

    let mut out = Mesh::new(vertices, faces);
    out.compact();
    out
}
