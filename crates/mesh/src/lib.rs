//! Tile geometry: regular heightfield meshes and the triangle BVH built over
//! them.
//!
//! # Invariants
//! - Vertex positions are tile-local: x/y in `[0, extent]` from the tile's
//!   lower-left origin, z is absolute elevation in meters.
//! - Normals always reflect the final (displaced) positions.

mod bvh;
mod grid;
mod mesh;

pub use bvh::{Bvh, RayHit};
pub use grid::{TerrainMesh, build_grid_mesh, grid_sample_points};
pub use mesh::{MeshData, Vertex};

/// Errors from building or validating tile geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeshError {
    #[error("resolution must be at least 1, got {0}")]
    ZeroResolution(u32),
    #[error("expected {expected} height samples, got {actual}")]
    SampleCount { expected: usize, actual: usize },
    #[error("index buffer length {0} is not a multiple of 3")]
    RaggedIndices(usize),
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },
    #[error("non-finite vertex position at {0}")]
    NonFinite(usize),
}

pub fn crate_info() -> &'static str {
    "terrastream-mesh v0.1.0"
}
