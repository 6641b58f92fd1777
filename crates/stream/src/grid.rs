use glam::DVec2;
use terrastream_common::TileCoord;

/// Planar square a tile covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileFootprint {
    pub coord: TileCoord,
    /// Lower-left (south-west) corner.
    pub origin: DVec2,
    pub extent: f64,
}

impl TileFootprint {
    pub fn center(&self) -> DVec2 {
        self.origin + DVec2::splat(self.extent * 0.5)
    }

    pub fn contains(&self, point: DVec2) -> bool {
        let local = point - self.origin;
        (0.0..=self.extent).contains(&local.x) && (0.0..=self.extent).contains(&local.y)
    }
}

/// Fixed-size square tiling of the plane.
///
/// Tile `(i, j)` is centered at `(i * extent, j * extent)` and covers half an
/// extent either side, so the tile containing a point is also the one whose
/// center is nearest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    extent: f64,
}

impl TileGrid {
    pub fn new(extent: f64) -> Self {
        assert!(
            extent.is_finite() && extent > 0.0,
            "tile extent must be positive"
        );
        Self { extent }
    }

    pub fn extent(&self) -> f64 {
        self.extent
    }

    /// Tile whose footprint contains `pos`.
    pub fn tile_at(&self, pos: DVec2) -> TileCoord {
        TileCoord::new(
            (pos.x / self.extent).round() as i32,
            (pos.y / self.extent).round() as i32,
        )
    }

    pub fn center_of(&self, coord: TileCoord) -> DVec2 {
        DVec2::new(coord.east as f64, coord.north as f64) * self.extent
    }

    pub fn footprint(&self, coord: TileCoord) -> TileFootprint {
        TileFootprint {
            coord,
            origin: self.center_of(coord) - DVec2::splat(self.extent * 0.5),
            extent: self.extent,
        }
    }

    /// Neighborhood radius, in tiles, that can hold a center within `distance`.
    pub fn radius_for(&self, distance: f64) -> i32 {
        (distance / self.extent).ceil().max(0.0) as i32
    }

    /// Tiles whose centers lie strictly within `distance` of `pos`, nearest
    /// first. Ties keep row-major order so results are deterministic.
    pub fn tiles_within(&self, pos: DVec2, distance: f64) -> Vec<(TileCoord, f64)> {
        let center = self.tile_at(pos);
        let radius = self.radius_for(distance);
        let mut result = Vec::new();
        for dn in -radius..=radius {
            for de in -radius..=radius {
                let coord = TileCoord::new(center.east + de, center.north + dn);
                let d = self.center_of(coord).distance(pos);
                if d < distance {
                    result.push((coord, d));
                }
            }
        }
        result.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        result
    }
}
