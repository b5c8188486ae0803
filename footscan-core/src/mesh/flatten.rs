use super::{Mesh, UpAxis};

/// Snap every vertex lying strictly below `min + tolerance` along `axis`
/// exactly onto that minimum, giving the mesh a flat base.
///
/// Returns how many vertices were moved onto the base plane.
pub fn flatten_base(mesh: &mut Mesh, axis: UpAxis, tolerance: f64) -> usize {
    let axis = axis.index();
    let Some(min) = mesh
        .vertices
        .iter()
        .map(|v| v[axis])
        .min_by(|a, b| a.total_cmp(b))
    else {
        return 0;
    };

    let cutoff = min + tolerance;
    let mut snapped = 0;
    for vertex in &mut mesh.vertices {
        if vertex[axis] < cutoff {
            vertex[axis] = min;
            snapped += 1;
        }
    }
    snapped
}
