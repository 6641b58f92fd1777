//! Coordinate transforms between the scene's planar projection and geographic
//! longitude/latitude.
//!
//! # Invariants
//! - Transforms are pure: no state, no I/O, same input gives the same output.
//! - Round-trip error stays well under the 0.1 m elevation-cache quantum.

mod utm;

use glam::DVec2;
use serde::{Deserialize, Serialize};

pub use utm::{Hemisphere, UtmProjection, WGS84_A, WGS84_F};

/// Geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lon, self.lat)
    }
}

/// Errors from constructing a projection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("UTM zone {0} out of range 1..=60")]
    InvalidZone(u8),
    #[error("latitude {0} outside the UTM band -80..=84")]
    LatitudeOutOfRange(f64),
}

/// Bidirectional conversion between planar (east, north) scene coordinates and
/// geographic coordinates.
pub trait CoordinateTransform {
    fn to_geographic(&self, planar: DVec2) -> GeoPoint;
    fn to_planar(&self, geo: GeoPoint) -> DVec2;
}

/// Identity-like transform that treats planar meters as degrees scaled by a
/// constant. Useful for tests and offline runs that never hit a real provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearDegrees {
    pub meters_per_degree: f64,
}

impl Default for LinearDegrees {
    fn default() -> Self {
        Self {
            meters_per_degree: 111_320.0,
        }
    }
}

impl CoordinateTransform for LinearDegrees {
    fn to_geographic(&self, planar: DVec2) -> GeoPoint {
        GeoPoint::new(
            planar.x / self.meters_per_degree,
            planar.y / self.meters_per_degree,
        )
    }

    fn to_planar(&self, geo: GeoPoint) -> DVec2 {
        DVec2::new(geo.lon, geo.lat) * self.meters_per_degree
    }
}

pub fn crate_info() -> &'static str {
    "terrastream-geo v0.1.0"
}
