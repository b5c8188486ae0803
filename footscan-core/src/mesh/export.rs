//! Binary encoders for the two downloadable artifacts: STL for the
//! full-resolution mesh and glTF binary (GLB) for the browser preview.

use serde_json::json;

use super::{Mesh, bounds_of};
use crate::error::{PipelineError, Result};

const STL_HEADER_LEN: usize = 80;
const STL_FACE_LEN: usize = 50;

const GLB_MAGIC: u32 = 0x4654_6C67;
const GLB_VERSION: u32 = 2;
const GLB_CHUNK_JSON: u32 = 0x4E4F_534A;
const GLB_CHUNK_BIN: u32 = 0x004E_4942;

const GL_FLOAT: u32 = 5126;
const GL_UNSIGNED_INT: u32 = 5125;
const GL_ARRAY_BUFFER: u32 = 34962;
const GL_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const GL_TRIANGLES: u32 = 4;

/// Encode `mesh` as binary STL.
pub fn encode_stl(mesh: &Mesh) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(STL_HEADER_LEN + 4 + mesh.num_faces() * STL_FACE_LEN);

    let mut header = [0u8; STL_HEADER_LEN];
    let label = b"footscan binary stl";
    header[..label.len()].copy_from_slice(label);
    out.extend_from_slice(&header);
    out.extend_from_slice(&(mesh.num_faces() as u32).to_le_bytes());

    for (index, face) in mesh.faces.iter().enumerate() {
        let normal = mesh.face_normal(index);
        for component in normal.iter() {
            out.extend_from_slice(&(*component as f32).to_le_bytes());
        }
        for &v in face {
            let vertex = mesh.vertices[v as usize];
            for component in vertex.coords.iter() {
                out.extend_from_slice(&(*component as f32).to_le_bytes());
            }
        }
        // Attribute byte count, unused.
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    out
}

/// Encode `mesh` as a single-primitive glTF 2.0 binary.
pub fn encode_glb(mesh: &Mesh) -> Result<Vec<u8>> {
    if mesh.is_empty() {
        return Err(PipelineError::Geometry(
            "cannot encode an empty preview mesh".into(),
        ));
    }

    let positions: Vec<[f32; 3]> = mesh
        .vertices
        .iter()
        .map(|p| [p.x as f32, p.y as f32, p.z as f32])
        .collect();
    let (min, max) = bounds_of(&mesh.vertices).ok_or_else(|| {
        PipelineError::Geometry("preview mesh has no vertices".into())
    })?;

    let positions_len = positions.len() * 12;
    let indices_len = mesh.num_faces() * 12;

    let mut bin = Vec::with_capacity(positions_len + indices_len);
    for position in &positions {
        for component in position {
            bin.extend_from_slice(&component.to_le_bytes());
        }
    }
    for face in &mesh.faces {
        for index in face {
            bin.extend_from_slice(&index.to_le_bytes());
        }
    }

    let document = json!({
        "asset": { "version": "2.0", "generator": "footscan" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0, "name": "foot" }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1,
                "mode": GL_TRIANGLES,
            }]
        }],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": GL_FLOAT,
                "count": positions.len(),
                "type": "VEC3",
                "min": [min.x as f32, min.y as f32, min.z as f32],
                "max": [max.x as f32, max.y as f32, max.z as f32],
            },
            {
                "bufferView": 1,
                "componentType": GL_UNSIGNED_INT,
                "count": mesh.num_faces() * 3,
                "type": "SCALAR",
            }
        ],
        "bufferViews": [
            {
                "buffer": 0,
                "byteOffset": 0,
                "byteLength": positions_len,
                "target": GL_ARRAY_BUFFER,
            },
            {
                "buffer": 0,
                "byteOffset": positions_len,
                "byteLength": indices_len,
                "target": GL_ELEMENT_ARRAY_BUFFER,
            }
        ],
        "buffers": [{ "byteLength": bin.len() }],
    });

    let mut json_chunk = serde_json::to_vec(&document).map_err(|err| {
        PipelineError::Internal(format!("failed to serialize glTF: {err}"))
    })?;
    pad_to_four(&mut json_chunk, b' ');
    pad_to_four(&mut bin, 0);

    let total = 12 + 8 + json_chunk.len() + 8 + bin.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());

    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&GLB_CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_chunk);

    out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
    out.extend_from_slice(&GLB_CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin);

    Ok(out)
}

fn pad_to_four(buf: &mut Vec<u8>, fill: u8) {
    while buf.len() % 4 != 0 {
        buf.push(fill);
    }
}
