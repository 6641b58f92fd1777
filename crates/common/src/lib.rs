//! Shared value types for the terrain streaming workspace.
//!
//! # Invariants
//! - Tile identity is a pair of integer grid coordinates, never a formatted string.
//! - Planar coordinates are (east, north) in meters; up is +Z.

mod types;

pub use types::{Aabb, BoundingSphere, TileCoord, Viewpoint};

pub fn crate_info() -> &'static str {
    "terrastream-common v0.1.0"
}
