use std::num::NonZeroUsize;
use std::path::Path;

use glam::DVec2;
use serde::{Deserialize, Serialize};
use terrastream_geo::{Hemisphere, ProjectionError, UtmProjection};

/// Errors from loading or validating streaming configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),
}

/// Largest load radius, in tiles, a config may ask for. The candidate scan
/// covers `(2r + 1)^2` tiles per update.
pub const MAX_TILE_RADIUS: u32 = 256;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Streaming configuration: tile size, load/evict radii and per-frame budget.
///
/// All numeric policy lives here rather than in code so different scenes can
/// trade memory for reach without rebuilding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerrainConfig {
    /// Side length of one tile in planar units.
    pub tile_extent: f64,
    /// Load radius used when the viewpoint does not ask for less.
    pub view_distance: f64,
    /// Hard ceiling on the load radius (camera far plane).
    pub max_view_distance: f64,
    /// Eviction radius as a multiple of the load radius.
    pub evict_factor: f64,
    /// Quads per tile side for generated heightfields.
    pub resolution: u32,
    /// Tiles moved from the fetch queue into flight per update.
    pub loads_per_frame: usize,
    /// Decimal digits kept in elevation cache keys (1 → 0.1 unit).
    pub elevation_precision: u32,
    /// LRU cap on cached elevation samples. `None` never evicts.
    pub elevation_cache_capacity: Option<usize>,
    /// Initial wireframe display state.
    pub wireframe: bool,
    pub projection: ProjectionConfig,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            tile_extent: 1000.0,
            view_distance: 2500.0,
            max_view_distance: 20_000.0,
            evict_factor: 1.5,
            resolution: 32,
            loads_per_frame: 2,
            elevation_precision: 1,
            elevation_cache_capacity: Some(262_144),
            wireframe: false,
            projection: ProjectionConfig::default(),
        }
    }
}

impl TerrainConfig {
    /// Load a YAML config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tile_extent.is_finite() && self.tile_extent > 0.0) {
            return Err(invalid("tile_extent", "must be a positive number"));
        }
        if !(self.view_distance.is_finite() && self.view_distance > 0.0) {
            return Err(invalid("view_distance", "must be a positive number"));
        }
        if !(self.max_view_distance.is_finite() && self.max_view_distance > 0.0) {
            return Err(invalid("max_view_distance", "must be a positive number"));
        }
        let radius = (self.max_view_distance / self.tile_extent).ceil();
        if radius > f64::from(MAX_TILE_RADIUS) {
            return Err(invalid(
                "max_view_distance",
                format!(
                    "spans {radius} tiles of {} units, at most {MAX_TILE_RADIUS} allowed",
                    self.tile_extent
                ),
            ));
        }
        if !(self.evict_factor.is_finite() && self.evict_factor >= 1.0) {
            return Err(invalid(
                "evict_factor",
                format!("must be >= 1.0, got {}", self.evict_factor),
            ));
        }
        if self.resolution == 0 {
            return Err(invalid("resolution", "must be at least 1"));
        }
        if self.loads_per_frame == 0 {
            return Err(invalid("loads_per_frame", "must be at least 1"));
        }
        if self.elevation_precision > 6 {
            return Err(invalid(
                "elevation_precision",
                format!("at most 6 decimal digits, got {}", self.elevation_precision),
            ));
        }
        if self.elevation_cache_capacity == Some(0) {
            return Err(invalid("elevation_cache_capacity", "use null for unbounded, not 0"));
        }
        self.projection.build()?;
        Ok(())
    }

    /// Load radius for a frame: the viewpoint's request clamped to the maximum.
    pub fn effective_view_distance(&self, requested: f64) -> f64 {
        let requested = if requested.is_finite() && requested > 0.0 {
            requested
        } else {
            self.view_distance
        };
        requested.min(self.max_view_distance)
    }

    pub fn evict_distance(&self, view_distance: f64) -> f64 {
        view_distance * self.evict_factor
    }

    pub fn cache_capacity(&self) -> Option<NonZeroUsize> {
        self.elevation_cache_capacity.and_then(NonZeroUsize::new)
    }
}

/// UTM zone and local origin the scene's planar coordinates are measured from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionConfig {
    pub zone: u8,
    pub hemisphere: Hemisphere,
    pub origin_easting: f64,
    pub origin_northing: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            zone: 10,
            hemisphere: Hemisphere::North,
            origin_easting: 500_000.0,
            origin_northing: 5_000_000.0,
        }
    }
}

impl ProjectionConfig {
    pub fn build(&self) -> Result<UtmProjection, ProjectionError> {
        Ok(UtmProjection::new(self.zone, self.hemisphere)?
            .with_local_origin(DVec2::new(self.origin_easting, self.origin_northing)))
    }
}
