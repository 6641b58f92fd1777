use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use terrastream_common::Aabb;

use crate::MeshError;

/// GPU vertex layout shared by every tile mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Indexed triangle list with interleaved vertices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Assemble a mesh from decoded buffers, as produced by a payload
    /// transcoder. Normals are recomputed from the positions.
    pub fn from_buffers(
        positions: &[[f32; 3]],
        uvs: Option<&[[f32; 2]]>,
        indices: Vec<u32>,
    ) -> Result<Self, MeshError> {
        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, p)| Vertex {
                position: *p,
                normal: [0.0, 0.0, 1.0],
                uv: uvs.and_then(|uv| uv.get(i)).copied().unwrap_or([0.0, 0.0]),
            })
            .collect();
        let mut mesh = Self { vertices, indices };
        mesh.validate()?;
        mesh.recompute_normals();
        Ok(mesh)
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.indices.len() % 3 != 0 {
            return Err(MeshError::RaggedIndices(self.indices.len()));
        }
        let vertex_count = self.vertices.len();
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexOutOfRange {
                index,
                vertex_count,
            });
        }
        if let Some(i) = self
            .vertices
            .iter()
            .position(|v| !v.position().is_finite())
        {
            return Err(MeshError::NonFinite(i));
        }
        Ok(())
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Size of the vertex and index buffers as uploaded.
    pub fn byte_size(&self) -> usize {
        bytemuck::cast_slice::<Vertex, u8>(&self.vertices).len()
            + bytemuck::cast_slice::<u32, u8>(&self.indices).len()
    }

    pub fn bounds(&self) -> Aabb {
        self.vertices
            .iter()
            .fold(Aabb::EMPTY, |acc, v| acc.grow(v.position()))
    }

    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let base = index * 3;
        [
            self.vertices[self.indices[base] as usize].position(),
            self.vertices[self.indices[base + 1] as usize].position(),
            self.vertices[self.indices[base + 2] as usize].position(),
        ]
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        (0..self.triangle_count()).map(|i| self.triangle(i))
    }

    /// Area-weighted vertex normals from the current positions. Vertices not
    /// referenced by any triangle point straight up.
    pub fn recompute_normals(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let pa = self.vertices[a].position();
            let pb = self.vertices[b].position();
            let pc = self.vertices[c].position();
            let face = (pb - pa).cross(pc - pa);
            accum[a] += face;
            accum[b] += face;
            accum[c] += face;
        }
        for (vertex, n) in self.vertices.iter_mut().zip(accum) {
            vertex.normal = n.try_normalize().unwrap_or(Vec3::Z).to_array();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> MeshData {
        MeshData::from_buffers(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            None,
            vec![0, 1, 2, 0, 2, 3],
        )
        .unwrap()
    }

    #[test]
    fn flat_quad_normals_point_up() {
        let mesh = quad();
        for v in &mesh.vertices {
            assert_eq!(v.normal, [0.0, 0.0, 1.0]);
        }
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn byte_size_counts_both_buffers() {
        let mesh = quad();
        assert_eq!(mesh.byte_size(), 4 * 32 + 6 * 4);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let err = MeshData::from_buffers(&[[0.0; 3]; 3], None, vec![0, 1, 3]).unwrap_err();
        assert_eq!(
            err,
            MeshError::IndexOutOfRange {
                index: 3,
                vertex_count: 3
            }
        );
    }

    #[test]
    fn rejects_ragged_indices() {
        let err = MeshData::from_buffers(&[[0.0; 3]; 3], None, vec![0, 1]).unwrap_err();
        assert_eq!(err, MeshError::RaggedIndices(2));
    }

    #[test]
    fn rejects_nan_position() {
        let err = MeshData::from_buffers(
            &[[0.0; 3], [f32::NAN, 0.0, 0.0], [0.0, 1.0, 0.0]],
            None,
            vec![0, 1, 2],
        )
        .unwrap_err();
        assert_eq!(err, MeshError::NonFinite(1));
    }

    #[test]
    fn bounds_cover_vertices() {
        let b = quad().bounds();
        assert_eq!(b.min, Vec3::ZERO);
        assert_eq!(b.max, Vec3::new(1.0, 1.0, 0.0));
    }
}
