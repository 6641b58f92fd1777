use glam::{DVec2, Vec3};

use crate::{MeshData, MeshError, Vertex};

/// A displaced grid mesh plus the elevation range it spans.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainMesh {
    pub mesh: MeshData,
    pub min_elevation: f64,
    pub max_elevation: f64,
}

/// Planar sample positions for a `resolution x resolution` quad grid whose
/// lower-left corner is `origin`. Row-major from the south edge, so sample
/// `row * (resolution + 1) + col` sits at `origin + (col, row) * step`.
pub fn grid_sample_points(origin: DVec2, extent: f64, resolution: u32) -> Vec<DVec2> {
    let side = resolution as usize + 1;
    let step = extent / resolution.max(1) as f64;
    let mut points = Vec::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            points.push(origin + DVec2::new(col as f64, row as f64) * step);
        }
    }
    points
}

/// Build a regular grid mesh from per-vertex heights laid out as
/// [`grid_sample_points`] returns them.
pub fn build_grid_mesh(
    extent: f64,
    resolution: u32,
    heights: &[f64],
) -> Result<TerrainMesh, MeshError> {
    if resolution == 0 {
        return Err(MeshError::ZeroResolution(resolution));
    }
    let side = resolution as usize + 1;
    if heights.len() != side * side {
        return Err(MeshError::SampleCount {
            expected: side * side,
            actual: heights.len(),
        });
    }

    let step = extent / resolution as f64;
    let mut min_elevation = f64::INFINITY;
    let mut max_elevation = f64::NEG_INFINITY;
    let mut vertices = Vec::with_capacity(side * side);

    for row in 0..side {
        for col in 0..side {
            let h = heights[row * side + col];
            min_elevation = min_elevation.min(h);
            max_elevation = max_elevation.max(h);
            let position = Vec3::new(
                (col as f64 * step) as f32,
                (row as f64 * step) as f32,
                h as f32,
            );
            vertices.push(Vertex {
                position: position.to_array(),
                normal: [0.0, 0.0, 1.0],
                uv: [
                    col as f32 / resolution as f32,
                    row as f32 / resolution as f32,
                ],
            });
        }
    }

    let mut indices = Vec::with_capacity(resolution as usize * resolution as usize * 6);
    for row in 0..resolution as usize {
        for col in 0..resolution as usize {
            let v00 = (row * side + col) as u32;
            let v10 = v00 + 1;
            let v01 = v00 + side as u32;
            let v11 = v01 + 1;
            indices.extend_from_slice(&[v00, v10, v11, v00, v11, v01]);
        }
    }

    let mut mesh = MeshData { vertices, indices };
    mesh.validate()?;
    mesh.recompute_normals();

    tracing::trace!(
        resolution,
        min_elevation,
        max_elevation,
        "built grid mesh"
    );

    Ok(TerrainMesh {
        mesh,
        min_elevation,
        max_elevation,
    })
}
