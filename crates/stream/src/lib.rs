//! Streaming: terrain tile lifecycle, frame-budgeted fetching, elevation cache.
//!
//! # Invariants
//! - At most one tile per coordinate is tracked; each tracked tile is Queued,
//!   Loading or Loaded once an update returns.
//! - A tile is attached to the scene only while Loaded, and its resources
//!   are released on every path out of Loaded or Loading.
//! - No more than `loads_per_frame` loads start per update; no update blocks
//!   on I/O.
//!
//! # Threading
//! Everything runs on the caller's thread. Loads are `!Send` futures driven
//! by a local executor between updates, so tiles, the queue and the
//! elevation cache need no locks.

mod config;
mod elevation;
mod field;
mod grid;
mod loader;
mod queue;
mod stats;
mod tile;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, MAX_TILE_RADIUS, ProjectionConfig, TerrainConfig};
pub use elevation::{CacheStats, ElevationCache, ElevationKey, ElevationProvider};
pub use field::TerrainField;
pub use grid::{TileFootprint, TileGrid};
pub use loader::{
    GeometryProvider, GeometrySource, HeightSource, ImageryProvider, ImageryRequest, LoadError,
    LoadFuture, LoadedGeometry, LoaderRegistry, MeshTranscoder, PlaceholderImagery,
    RawMeshTranscoder,
};
pub use queue::FetchQueue;
pub use stats::{StreamStats, UpdateTimer};
pub use tile::{LoadedParts, Tile, TileError, TileLoad, TileState};

pub fn crate_info() -> &'static str {
    "terrastream-stream v0.1.0"
}
