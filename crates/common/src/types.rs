use glam::{DVec2, DVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Integer grid coordinate of a terrain tile.
///
/// Tile `(east, north)` is centered at `(east * extent, north * extent)` in
/// planar space. Ordering is row-major (north, then east) so sorted tile lists
/// read like a map from the south-west corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub east: i32,
    pub north: i32,
}

impl TileCoord {
    pub fn new(east: i32, north: i32) -> Self {
        Self { east, north }
    }

    /// Key used by content-delivery endpoints for pre-baked tile payloads.
    pub fn content_key(&self) -> String {
        format!("{}_{}", self.east, self.north)
    }

    /// Chebyshev distance in tiles.
    pub fn ring_distance(&self, other: TileCoord) -> u32 {
        let de = (self.east - other.east).unsigned_abs();
        let dn = (self.north - other.north).unsigned_abs();
        de.max(dn)
    }
}

impl PartialOrd for TileCoord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileCoord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.north
            .cmp(&other.north)
            .then(self.east.cmp(&other.east))
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.east, self.north)
    }
}

/// Read-only snapshot of the viewer, taken once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewpoint {
    /// Planar position (east, north).
    pub position: DVec2,
    /// Requested view distance; the streamer clamps it to its configured maximum.
    pub view_distance: f64,
    /// Wireframe display toggle. `None` leaves the current setting untouched.
    pub wireframe: Option<bool>,
}

impl Viewpoint {
    pub fn new(position: DVec2, view_distance: f64) -> Self {
        Self {
            position,
            view_distance,
            wireframe: None,
        }
    }

    pub fn with_wireframe(mut self, enabled: bool) -> Self {
        self.wireframe = Some(enabled);
        self
    }
}

/// Sphere enclosing a tile's geometry, in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Sphere around a square footprint of side `extent` spanning the given
    /// elevation range.
    pub fn around_footprint(center: DVec2, extent: f64, min_z: f64, max_z: f64) -> Self {
        let half = extent * 0.5;
        let half_height = (max_z - min_z).max(0.0) * 0.5;
        Self {
            center: DVec3::new(center.x, center.y, (min_z + max_z) * 0.5),
            radius: (2.0 * half * half + half_height * half_height).sqrt(),
        }
    }

    /// Distance on the (east, north) plane from `point` to the sphere center.
    pub fn planar_distance(&self, point: DVec2) -> f64 {
        self.center.truncate().distance(point)
    }

    pub fn contains(&self, point: DVec3) -> bool {
        self.center.distance_squared(point) <= self.radius * self.radius
    }
}

/// Axis-aligned box in tile-local single-precision space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any `grow` call replaces.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        points.iter().fold(Self::EMPTY, |acc, p| acc.grow(*p))
    }

    pub fn grow(self, p: Vec3) -> Self {
        Self {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    pub fn union(self, other: Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Slab test. Returns the entry distance along the ray if it hits within
    /// `[0, t_max]`. Axis-parallel rays are handled without dividing by zero.
    pub fn ray_entry(&self, origin: Vec3, dir: Vec3, t_max: f32) -> Option<f32> {
        let mut t_near = 0.0f32;
        let mut t_far = t_max;
        for axis in 0..3 {
            let (o, d) = (origin[axis], dir[axis]);
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (mut t0, mut t1) = ((lo - o) * inv, (hi - o) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_near = t_near.max(t0);
            t_far = t_far.min(t1);
            if t_near > t_far {
                return None;
            }
        }
        Some(t_near)
    }
}
