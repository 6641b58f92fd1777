use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use glam::{DVec2, DVec3};
use serde::Serialize;
use terrastream_common::{BoundingSphere, TileCoord};
use terrastream_mesh::{Bvh, MeshData};
use terrastream_render::{
    Material, RenderableId, ResourceKind, SceneSink, TextureData, TileRenderable, Tracked,
};

use crate::grid::TileFootprint;
use crate::loader::{LoadError, LoadedGeometry, LoaderRegistry};
use crate::queue::FetchQueue;

/// Lifecycle of a tile.
///
/// ```text
/// Unloaded -> Queued -> Loading -> Loaded -> Unloaded
///                 \         \
///                  -> Unloaded (cancelled / failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TileState {
    Unloaded,
    Queued,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TileError {
    #[error("tile {tile}: cannot {operation} while {state:?}")]
    InvalidTransition {
        tile: TileCoord,
        operation: &'static str,
        state: TileState,
    },
}

/// Completed fetches for one tile, not yet installed.
#[derive(Debug)]
pub struct LoadedParts {
    pub geometry: LoadedGeometry,
    pub texture: Tracked<TextureData>,
}

/// In-flight load for one tile. Dropping it releases anything it had fetched.
pub type TileLoad = LocalBoxFuture<'static, Result<LoadedParts, LoadError>>;

/// Resources a resident tile owns. Dropped field by field on eviction.
#[derive(Debug)]
struct Resident {
    renderable: RenderableId,
    texture: Tracked<TextureData>,
    material: Tracked<Material>,
    mesh: Tracked<MeshData>,
    index: Tracked<Bvh>,
}

/// One square of terrain and everything it holds while resident.
#[derive(Debug)]
pub struct Tile {
    footprint: TileFootprint,
    state: TileState,
    bounds: BoundingSphere,
    elevation_range: Option<(f64, f64)>,
    resident: Option<Resident>,
    registry: Rc<LoaderRegistry>,
    load_attempts: u32,
}

impl Tile {
    pub fn new(footprint: TileFootprint, registry: Rc<LoaderRegistry>) -> Self {
        Self {
            bounds: BoundingSphere::around_footprint(
                footprint.center(),
                footprint.extent,
                0.0,
                0.0,
            ),
            footprint,
            state: TileState::Unloaded,
            elevation_range: None,
            resident: None,
            registry,
            load_attempts: 0,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.footprint.coord
    }

    pub fn footprint(&self) -> &TileFootprint {
        &self.footprint
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// Sphere around the tile. Flat until geometry loads, then spans its
    /// elevation range.
    pub fn bounds(&self) -> &BoundingSphere {
        &self.bounds
    }

    pub fn elevation_range(&self) -> Option<(f64, f64)> {
        self.elevation_range
    }

    pub fn renderable(&self) -> Option<RenderableId> {
        self.resident.as_ref().map(|r| r.renderable)
    }

    pub fn wireframe(&self) -> bool {
        self.resident.as_ref().is_some_and(|r| r.material.wireframe)
    }

    pub fn load_attempts(&self) -> u32 {
        self.load_attempts
    }

    /// Unloaded → Queued. Returns false, leaving the queue untouched, in any
    /// other state.
    pub fn enqueue(&mut self, queue: &mut FetchQueue) -> bool {
        if self.state != TileState::Unloaded {
            return false;
        }
        if !queue.push(self.coord()) {
            return false;
        }
        self.state = TileState::Queued;
        true
    }

    /// Queued → Unloaded, removing the queue entry.
    pub fn cancel(&mut self, queue: &mut FetchQueue) -> bool {
        if self.state != TileState::Queued {
            return false;
        }
        queue.cancel(self.coord());
        self.state = TileState::Unloaded;
        true
    }

    /// Queued → Loading. Starts the geometry and imagery fetches together; the
    /// returned future resolves when both have, or as soon as either fails.
    pub fn begin_load(&mut self) -> Result<TileLoad, TileError> {
        if self.state != TileState::Queued {
            return Err(self.invalid("begin loading"));
        }
        self.state = TileState::Loading;
        self.load_attempts += 1;
        tracing::debug!(tile = %self.coord(), attempt = self.load_attempts, "loading tile");

        let geometry = self.registry.load_geometry(&self.footprint);
        let texture = self.registry.load_texture(&self.footprint);
        Ok(async move {
            let (geometry, texture) = futures::future::try_join(geometry, texture).await?;
            Ok(LoadedParts { geometry, texture })
        }
        .boxed_local())
    }

    /// Loading → Loaded on success, Loading → Unloaded on failure.
    ///
    /// On success builds the material and spatial index and attaches the tile
    /// to `scene`. On failure everything fetched so far is dropped and nothing
    /// reaches the scene.
    pub fn complete_load(
        &mut self,
        result: Result<LoadedParts, LoadError>,
        scene: &mut dyn SceneSink,
    ) -> Result<(), TileError> {
        if self.state != TileState::Loading {
            return Err(self.invalid("complete a load"));
        }

        let parts = match result {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!(tile = %self.coord(), %err, "tile load failed");
                self.state = TileState::Unloaded;
                return Ok(());
            }
        };

        let ledger = self.registry.ledger();
        let LoadedParts { geometry, texture } = parts;
        let index = Bvh::build(&geometry.mesh);
        let index = ledger.track(ResourceKind::SpatialIndex, index.byte_size(), index);
        let material = ledger.track(
            ResourceKind::Material,
            std::mem::size_of::<Material>(),
            Material::default(),
        );

        let translation = DVec3::new(self.footprint.origin.x, self.footprint.origin.y, 0.0);
        let renderable = scene.attach(&TileRenderable {
            tile: self.coord(),
            translation,
            mesh: &geometry.mesh,
            material: &material,
            texture: &texture,
        });

        let (lo, hi) = (geometry.min_elevation, geometry.max_elevation);
        let center = self.footprint.center();
        self.bounds = BoundingSphere::around_footprint(center, self.footprint.extent, lo, hi);
        self.elevation_range = Some((lo, hi));
        self.resident = Some(Resident {
            renderable,
            texture,
            material,
            mesh: geometry.mesh,
            index,
        });
        self.state = TileState::Loaded;
        tracing::debug!(tile = %self.coord(), min = lo, max = hi, "tile loaded");
        Ok(())
    }

    /// Loaded → Unloaded. Detaches from `scene`, then releases texture,
    /// material, mesh buffers and spatial index.
    pub fn evict(&mut self, scene: &mut dyn SceneSink) -> Result<(), TileError> {
        if self.state != TileState::Loaded {
            return Err(self.invalid("evict"));
        }
        if let Some(resident) = self.resident.take() {
            let Resident {
                renderable,
                texture,
                material,
                mesh,
                index,
            } = resident;
            scene.detach(renderable);
            drop(texture);
            drop(material);
            drop(mesh);
            drop(index);
        }
        self.state = TileState::Unloaded;
        tracing::debug!(tile = %self.coord(), "tile evicted");
        Ok(())
    }

    /// Forward the wireframe flag to the tile's material. No-op unless loaded.
    pub fn set_wireframe(&mut self, enabled: bool, scene: &mut dyn SceneSink) {
        let Some(resident) = self.resident.as_mut() else {
            return;
        };
        if resident.material.wireframe == enabled {
            return;
        }
        resident.material.wireframe = enabled;
        scene.update_material(resident.renderable, &resident.material);
    }

    /// Ground height under a planar point inside this tile, from the spatial
    /// index. `None` unless loaded or if the point is off the surface.
    pub fn height_at(&self, point: DVec2) -> Option<f64> {
        let resident = self.resident.as_ref()?;
        let local = point - self.footprint.origin;
        resident
            .index
            .height_at(local.x as f32, local.y as f32)
            .map(f64::from)
    }

    fn invalid(&self, operation: &'static str) -> TileError {
        TileError::InvalidTransition {
            tile: self.coord(),
            operation,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileGrid;
    use crate::loader::HeightSource;
    use crate::testing::{
        FailingImagery, GatedImagery, flat_registry, registry_with, small_placeholder,
    };
    use futures::executor::{LocalPool, block_on};
    use futures::task::LocalSpawnExt;
    use std::cell::RefCell;
    use terrastream_render::DebugScene;

    fn tile(coord: TileCoord, registry: &Rc<LoaderRegistry>) -> Tile {
        Tile::new(TileGrid::new(100.0).footprint(coord), Rc::clone(registry))
    }

    fn load(tile: &mut Tile, scene: &mut DebugScene) {
        let mut queue = FetchQueue::new();
        assert!(tile.enqueue(&mut queue));
        let fut = tile.begin_load().unwrap();
        tile.complete_load(block_on(fut), scene).unwrap();
    }

    #[test]
    fn full_lifecycle_releases_everything() {
        let registry = Rc::new(flat_registry(4));
        let mut scene = DebugScene::new();
        let mut t = tile(TileCoord::new(0, 0), &registry);
        assert_eq!(t.state(), TileState::Unloaded);

        load(&mut t, &mut scene);
        assert_eq!(t.state(), TileState::Loaded);
        assert_eq!(scene.len(), 1);
        let counts = registry.ledger().snapshot();
        assert_eq!(counts.mesh_buffers, 1);
        assert_eq!(counts.textures, 1);
        assert_eq!(counts.materials, 1);
        assert_eq!(counts.spatial_indices, 1);

        t.evict(&mut scene).unwrap();
        assert_eq!(t.state(), TileState::Unloaded);
        assert!(scene.is_empty());
        assert!(registry.ledger().snapshot().is_zero());
        assert!(t.height_at(DVec2::ZERO).is_none());
    }

    #[test]
    fn enqueue_is_idempotent() {
        let registry = Rc::new(flat_registry(2));
        let mut queue = FetchQueue::new();
        let mut t = tile(TileCoord::new(1, 1), &registry);
        assert!(t.enqueue(&mut queue));
        assert!(!t.enqueue(&mut queue));
        assert_eq!(queue.len(), 1);
        assert_eq!(t.state(), TileState::Queued);

        let _load = t.begin_load().unwrap();
        assert!(!t.enqueue(&mut queue));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancel_returns_tile_to_unloaded() {
        let registry = Rc::new(flat_registry(2));
        let mut queue = FetchQueue::new();
        let mut t = tile(TileCoord::new(0, 0), &registry);
        t.enqueue(&mut queue);
        assert!(t.cancel(&mut queue));
        assert_eq!(t.state(), TileState::Unloaded);
        assert!(queue.is_empty());
        assert!(!t.cancel(&mut queue));
    }

    #[test]
    fn out_of_order_operations_are_rejected() {
        let registry = Rc::new(flat_registry(2));
        let mut scene = DebugScene::new();
        let mut t = tile(TileCoord::new(0, 0), &registry);

        assert!(matches!(
            t.begin_load(),
            Err(TileError::InvalidTransition {
                state: TileState::Unloaded,
                ..
            })
        ));
        assert!(t.evict(&mut scene).is_err());
        assert!(t.complete_load(Err(LoadError::Abandoned), &mut scene).is_err());
        assert_eq!(t.state(), TileState::Unloaded);
    }

    #[test]
    fn failed_imagery_leaves_nothing_behind() {
        let registry = Rc::new(registry_with(
            HeightSource::flat(0.0),
            Rc::new(FailingImagery),
            4,
        ));
        let mut scene = DebugScene::new();
        let mut t = tile(TileCoord::new(0, 0), &registry);
        let mut queue = FetchQueue::new();
        t.enqueue(&mut queue);
        queue.drain_one();
        let result = block_on(t.begin_load().unwrap());
        assert!(matches!(result, Err(LoadError::Network(_))));

        t.complete_load(result, &mut scene).unwrap();
        assert_eq!(t.state(), TileState::Unloaded);
        assert!(scene.is_empty());
        assert!(registry.ledger().snapshot().is_zero());
        assert!(t.enqueue(&mut queue));
    }

    #[test]
    fn partial_load_is_released_when_other_half_fails() {
        let gate = Rc::new(GatedImagery::default());
        let registry = Rc::new(registry_with(HeightSource::flat(1.0), gate.clone(), 4));
        let mut t = tile(TileCoord::new(0, 0), &registry);
        let mut queue = FetchQueue::new();
        t.enqueue(&mut queue);

        let mut pool = LocalPool::new();
        let outcome = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&outcome);
        let load = t.begin_load().unwrap();
        pool.spawner()
            .spawn_local(async move {
                *slot.borrow_mut() = Some(load.await);
            })
            .unwrap();

        pool.run_until_stalled();
        assert!(gate.is_pending(TileCoord::new(0, 0)));
        // Geometry finished and is held by the join while imagery waits.
        assert_eq!(registry.ledger().snapshot().mesh_buffers, 1);

        assert!(gate.fail(TileCoord::new(0, 0)));
        pool.run_until_stalled();
        let result = outcome.borrow_mut().take().unwrap();
        assert!(result.is_err());
        assert!(registry.ledger().snapshot().is_zero());

        let mut scene = DebugScene::new();
        t.complete_load(result, &mut scene).unwrap();
        assert!(scene.is_empty());
    }

    #[test]
    fn loaded_bounds_span_elevations() {
        let registry = Rc::new(registry_with(
            HeightSource::closed_form(|p| 10.0 + p.x * 0.1),
            Rc::new(small_placeholder()),
            4,
        ));
        let mut scene = DebugScene::new();
        let mut t = tile(TileCoord::new(0, 0), &registry);
        assert_eq!(t.bounds().center.z, 0.0);

        load(&mut t, &mut scene);
        let (lo, hi) = t.elevation_range().unwrap();
        assert!((lo - 5.0).abs() < 1e-9);
        assert!((hi - 15.0).abs() < 1e-9);
        assert!((t.bounds().center.z - 10.0).abs() < 1e-9);
        assert!(t.bounds().contains(DVec3::new(49.0, 49.0, 14.0)));
    }

    #[test]
    fn height_probe_reads_surface() {
        let registry = Rc::new(registry_with(
            HeightSource::closed_form(|p| 0.5 * p.x + 0.25 * p.y),
            Rc::new(small_placeholder()),
            8,
        ));
        let mut scene = DebugScene::new();
        let mut t = tile(TileCoord::new(3, 2), &registry);
        load(&mut t, &mut scene);

        let p = DVec2::new(312.5, 187.0);
        let h = t.height_at(p).unwrap();
        assert!((h - (0.5 * p.x + 0.25 * p.y)).abs() < 1e-2, "h = {h}");
    }

    #[test]
    fn wireframe_reaches_scene_only_on_change() {
        let registry = Rc::new(flat_registry(2));
        let mut scene = DebugScene::new();
        let mut t = tile(TileCoord::new(0, 0), &registry);
        t.set_wireframe(true, &mut scene);
        assert!(!t.wireframe());

        load(&mut t, &mut scene);
        let id = t.renderable().unwrap();
        t.set_wireframe(true, &mut scene);
        assert!(t.wireframe());
        assert!(scene.get(id).unwrap().wireframe);

        t.set_wireframe(false, &mut scene);
        assert!(!scene.get(id).unwrap().wireframe);
    }

    #[test]
    fn scene_receives_world_translation() {
        let registry = Rc::new(flat_registry(2));
        let mut scene = DebugScene::new();
        let mut t = tile(TileCoord::new(-2, 1), &registry);
        load(&mut t, &mut scene);
        let entry = scene.get(t.renderable().unwrap()).unwrap();
        assert_eq!(entry.translation, DVec3::new(-250.0, 50.0, 0.0));
        assert_eq!(entry.texture_size, (4, 4));
    }
}
