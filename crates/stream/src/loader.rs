use std::f64::consts::TAU;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use glam::DVec2;
use terrastream_common::TileCoord;
use terrastream_geo::{CoordinateTransform, GeoPoint};
use terrastream_mesh::{MeshData, MeshError, build_grid_mesh, grid_sample_points};
use terrastream_render::{RenderError, ResourceKind, ResourceLedger, TextureData, Tracked};

use crate::elevation::ElevationCache;
use crate::grid::TileFootprint;

/// Why a tile's content could not be produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),
    #[error("texture error: {0}")]
    Texture(#[from] RenderError),
    #[error("load abandoned before completion")]
    Abandoned,
}

/// Single-threaded future produced by a provider.
pub type LoadFuture<T> = LocalBoxFuture<'static, Result<T, LoadError>>;

/// Geographic bounds of the imagery a tile needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageryRequest {
    pub tile: TileCoord,
    pub southwest: GeoPoint,
    pub northeast: GeoPoint,
}

impl ImageryRequest {
    pub fn for_footprint(footprint: &TileFootprint, transform: &dyn CoordinateTransform) -> Self {
        Self {
            tile: footprint.coord,
            southwest: transform.to_geographic(footprint.origin),
            northeast: transform.to_geographic(footprint.origin + DVec2::splat(footprint.extent)),
        }
    }
}

/// Source of decoded surface imagery for a tile.
pub trait ImageryProvider {
    fn fetch(&self, request: &ImageryRequest) -> LoadFuture<TextureData>;
}

/// Source of pre-baked, opaque tile geometry payloads keyed by
/// [`TileCoord::content_key`].
pub trait GeometryProvider {
    fn fetch(&self, key: &str) -> LoadFuture<Vec<u8>>;
}

/// Turns a compressed geometry payload into mesh buffers with tile-local
/// positions.
pub trait MeshTranscoder {
    fn decode(&self, payload: &[u8]) -> Result<MeshData, LoadError>;
}

/// Uncompressed payload: `[vertex_count: u32, index_count: u32]`, then
/// `vertex_count` xyz `f32` triples, then `index_count` `u32` indices, all in
/// native byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMeshTranscoder;

impl RawMeshTranscoder {
    pub fn encode(mesh: &MeshData) -> Vec<u8> {
        let positions: Vec<[f32; 3]> = mesh.vertices.iter().map(|v| v.position).collect();
        let header = [mesh.vertices.len() as u32, mesh.indices.len() as u32];
        let mut out = Vec::with_capacity(8 + positions.len() * 12 + mesh.indices.len() * 4);
        out.extend_from_slice(bytemuck::cast_slice(&header));
        out.extend_from_slice(bytemuck::cast_slice(&positions));
        out.extend_from_slice(bytemuck::cast_slice(&mesh.indices));
        out
    }
}

impl MeshTranscoder for RawMeshTranscoder {
    fn decode(&self, payload: &[u8]) -> Result<MeshData, LoadError> {
        if payload.len() < 8 {
            return Err(LoadError::Decode(format!(
                "payload of {} bytes has no header",
                payload.len()
            )));
        }
        let header: Vec<u32> = bytemuck::pod_collect_to_vec(&payload[..8]);
        let (vertex_count, index_count) = (header[0] as usize, header[1] as usize);
        let positions_end = 8 + vertex_count * 12;
        let expected = positions_end + index_count * 4;
        if payload.len() != expected {
            return Err(LoadError::Decode(format!(
                "expected {expected} bytes for {vertex_count} vertices and {index_count} indices, got {}",
                payload.len()
            )));
        }
        let positions: Vec<[f32; 3]> = bytemuck::pod_collect_to_vec(&payload[8..positions_end]);
        let indices: Vec<u32> = bytemuck::pod_collect_to_vec(&payload[positions_end..]);
        Ok(MeshData::from_buffers(&positions, None, indices)?)
    }
}

/// Checkerboard imagery for offline runs and tests. Adjacent tiles get
/// opposite phase so tile seams stay visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceholderImagery {
    pub size: u32,
    pub cells: u32,
    pub light: [u8; 4],
    pub dark: [u8; 4],
}

impl Default for PlaceholderImagery {
    fn default() -> Self {
        Self {
            size: 64,
            cells: 8,
            light: [200, 200, 190, 255],
            dark: [90, 110, 80, 255],
        }
    }
}

impl PlaceholderImagery {
    pub fn render(&self, tile: TileCoord) -> Result<TextureData, RenderError> {
        let cell = (self.size / self.cells.max(1)).max(1);
        let phase = (tile.east + tile.north).rem_euclid(2) as u32;
        let mut pixels = Vec::with_capacity(self.size as usize * self.size as usize * 4);
        for y in 0..self.size {
            for x in 0..self.size {
                let odd = (x / cell + y / cell + phase) % 2 == 1;
                pixels.extend_from_slice(if odd { &self.dark } else { &self.light });
            }
        }
        TextureData::rgba8(self.size, self.size, pixels)
    }
}

impl ImageryProvider for PlaceholderImagery {
    fn fetch(&self, request: &ImageryRequest) -> LoadFuture<TextureData> {
        futures::future::ready(self.render(request.tile).map_err(LoadError::from)).boxed_local()
    }
}

/// Where heightfield vertex elevations come from.
#[derive(Clone)]
pub enum HeightSource {
    /// Remote provider behind the shared elevation cache.
    Sampled(Rc<ElevationCache>),
    /// Local closed-form function of planar position.
    ClosedForm(Rc<dyn Fn(DVec2) -> f64>),
}

impl HeightSource {
    pub fn closed_form(f: impl Fn(DVec2) -> f64 + 'static) -> Self {
        Self::ClosedForm(Rc::new(f))
    }

    pub fn flat(elevation: f64) -> Self {
        Self::closed_form(move |_| elevation)
    }

    /// Smooth periodic hills of the given peak amplitude and wavelength.
    pub fn rolling_hills(amplitude: f64, wavelength: f64) -> Self {
        let k = TAU / wavelength.max(f64::EPSILON);
        Self::closed_form(move |p| amplitude * (k * p.x).sin() * (k * p.y).cos())
    }

    /// Heights for `points`, in order. Never fails: sampled sources substitute
    /// `0.0` for anything the provider could not answer.
    pub fn heights(&self, points: Vec<DVec2>) -> LocalBoxFuture<'static, Vec<f64>> {
        match self {
            Self::Sampled(cache) => {
                let cache = Rc::clone(cache);
                async move { cache.sample_many(&points).await }.boxed_local()
            }
            Self::ClosedForm(f) => {
                let f = Rc::clone(f);
                async move { points.iter().map(|p| f(*p)).collect() }.boxed_local()
            }
        }
    }
}

impl std::fmt::Debug for HeightSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sampled(cache) => f.debug_tuple("Sampled").field(cache).finish(),
            Self::ClosedForm(_) => f.write_str("ClosedForm"),
        }
    }
}

/// How a tile's mesh is produced.
#[derive(Clone)]
pub enum GeometrySource {
    /// Regular grid displaced by sampled or computed heights.
    Heightfield(HeightSource),
    /// Fetched payload decoded by a transcoder.
    Prebaked {
        provider: Rc<dyn GeometryProvider>,
        transcoder: Rc<dyn MeshTranscoder>,
    },
}

impl std::fmt::Debug for GeometrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heightfield(heights) => f.debug_tuple("Heightfield").field(heights).finish(),
            Self::Prebaked { .. } => f.write_str("Prebaked"),
        }
    }
}

/// Mesh buffers for one tile and the elevation range they span.
#[derive(Debug)]
pub struct LoadedGeometry {
    pub mesh: Tracked<MeshData>,
    pub min_elevation: f64,
    pub max_elevation: f64,
}

/// Everything a tile needs to load: geometry and imagery sources, the
/// coordinate transform and the ledger resources are charged to.
///
/// Shared by `Rc` with every tile, so providers and the elevation cache are
/// explicit dependencies rather than globals.
pub struct LoaderRegistry {
    geometry: GeometrySource,
    imagery: Rc<dyn ImageryProvider>,
    transform: Rc<dyn CoordinateTransform>,
    ledger: ResourceLedger,
    resolution: u32,
}

impl LoaderRegistry {
    pub fn new(
        geometry: GeometrySource,
        imagery: Rc<dyn ImageryProvider>,
        transform: Rc<dyn CoordinateTransform>,
        resolution: u32,
    ) -> Self {
        Self {
            geometry,
            imagery,
            transform,
            ledger: ResourceLedger::new(),
            resolution: resolution.max(1),
        }
    }

    pub fn geometry(&self) -> &GeometrySource {
        &self.geometry
    }

    pub fn transform(&self) -> &dyn CoordinateTransform {
        self.transform.as_ref()
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Future producing the tile's mesh, charged to the ledger on completion.
    pub fn load_geometry(&self, footprint: &TileFootprint) -> LoadFuture<LoadedGeometry> {
        let ledger = self.ledger.clone();
        match &self.geometry {
            GeometrySource::Heightfield(heights) => {
                let extent = footprint.extent;
                let resolution = self.resolution;
                let sampled =
                    heights.heights(grid_sample_points(footprint.origin, extent, resolution));
                async move {
                    let heights = sampled.await;
                    let terrain = build_grid_mesh(extent, resolution, &heights)?;
                    let bytes = terrain.mesh.byte_size();
                    Ok(LoadedGeometry {
                        mesh: ledger.track(ResourceKind::MeshBuffers, bytes, terrain.mesh),
                        min_elevation: terrain.min_elevation,
                        max_elevation: terrain.max_elevation,
                    })
                }
                .boxed_local()
            }
            GeometrySource::Prebaked {
                provider,
                transcoder,
            } => {
                let fetch = provider.fetch(&footprint.coord.content_key());
                let transcoder = Rc::clone(transcoder);
                async move {
                    let payload = fetch.await?;
                    let mesh = transcoder.decode(&payload)?;
                    mesh.validate()?;
                    let bounds = mesh.bounds();
                    let (min_elevation, max_elevation) = if bounds.is_empty() {
                        (0.0, 0.0)
                    } else {
                        (bounds.min.z as f64, bounds.max.z as f64)
                    };
                    let bytes = mesh.byte_size();
                    Ok(LoadedGeometry {
                        mesh: ledger.track(ResourceKind::MeshBuffers, bytes, mesh),
                        min_elevation,
                        max_elevation,
                    })
                }
                .boxed_local()
            }
        }
    }

    /// Future producing the tile's imagery, charged to the ledger on completion.
    pub fn load_texture(&self, footprint: &TileFootprint) -> LoadFuture<Tracked<TextureData>> {
        let request = ImageryRequest::for_footprint(footprint, self.transform.as_ref());
        let fetch = self.imagery.fetch(&request);
        let ledger = self.ledger.clone();
        async move {
            let texture = fetch.await?;
            let bytes = texture.byte_size();
            Ok(ledger.track(ResourceKind::Texture, bytes, texture))
        }
        .boxed_local()
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("geometry", &self.geometry)
            .field("resolution", &self.resolution)
            .field("resources", &self.ledger.snapshot())
            .finish_non_exhaustive()
    }
}
