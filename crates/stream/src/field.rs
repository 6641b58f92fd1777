use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;
use std::time::Instant;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use futures::{FutureExt, StreamExt};
use glam::DVec2;
use terrastream_common::{TileCoord, Viewpoint};
use terrastream_render::SceneSink;

use crate::config::{ConfigError, TerrainConfig};
use crate::grid::TileGrid;
use crate::loader::{LoadError, LoaderRegistry};
use crate::queue::FetchQueue;
use crate::stats::{StreamStats, UpdateTimer};
use crate::tile::{LoadedParts, Tile, TileState};

struct LoadOutcome {
    tile: TileCoord,
    result: Result<LoadedParts, LoadError>,
}

/// Keeps the set of resident tiles matched to a moving viewpoint.
///
/// Each [`update`](Self::update) runs on the caller's thread:
/// 1. drive in-flight loads and install the ones that finished,
/// 2. apply the viewpoint's wireframe toggle,
/// 3. enqueue missing tiles whose centers are within the view distance `D`,
/// 4. evict resident tiles beyond `evict_factor * D` and cancel queued ones
///    that far out,
/// 5. start up to `loads_per_frame` queued loads.
///
/// Tiles between `D` and `evict_factor * D` stay as they are, so a viewer
/// hovering near the edge does not thrash. Loads run on a local executor
/// and report back over a channel; only this pass adds or removes tiles.
pub struct TerrainField {
    config: TerrainConfig,
    grid: TileGrid,
    registry: Rc<LoaderRegistry>,
    tiles: HashMap<TileCoord, Tile>,
    queue: FetchQueue,
    pool: LocalPool,
    spawner: LocalSpawner,
    outcomes_tx: UnboundedSender<LoadOutcome>,
    outcomes_rx: UnboundedReceiver<LoadOutcome>,
    wireframe: bool,
    frame: u64,
    stats: StreamStats,
    timer: UpdateTimer,
}

impl TerrainField {
    pub fn new(config: TerrainConfig, registry: LoaderRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        let (outcomes_tx, outcomes_rx) = unbounded();
        tracing::info!(
            tile_extent = config.tile_extent,
            view_distance = config.view_distance,
            loads_per_frame = config.loads_per_frame,
            "terrain field ready"
        );
        Ok(Self {
            grid: TileGrid::new(config.tile_extent),
            wireframe: config.wireframe,
            config,
            registry: Rc::new(registry),
            tiles: HashMap::new(),
            queue: FetchQueue::new(),
            pool,
            spawner,
            outcomes_tx,
            outcomes_rx,
            frame: 0,
            stats: StreamStats::default(),
            timer: UpdateTimer::default(),
        })
    }

    /// Advance streaming by one frame.
    pub fn update(&mut self, view: &Viewpoint, scene: &mut dyn SceneSink) -> &StreamStats {
        self.frame += 1;
        let _span = tracing::info_span!("terrain_update", frame = self.frame).entered();
        let started = Instant::now();
        let mut stats = StreamStats {
            frame: self.frame,
            ..StreamStats::default()
        };

        self.install_finished(scene, &mut stats);

        if let Some(enabled) = view.wireframe {
            self.set_wireframe(enabled, scene);
        }

        let distance = self.config.effective_view_distance(view.view_distance);
        stats.view_distance = distance;
        self.enqueue_visible(view.position, distance, &mut stats);
        self.evict_distant(view.position, distance, scene, &mut stats);
        self.dispatch(scene, &mut stats);
        // Start the new fetches; results are installed next frame.
        self.pool.run_until_stalled();

        stats.tracked = self.tiles.len();
        stats.queued = self.queue.len();
        stats.loading = self.count(TileState::Loading);
        stats.resident = self.count(TileState::Loaded);
        stats.resources = self.registry.ledger().snapshot();
        stats.update_time = started.elapsed();
        self.timer.record(stats.update_time);

        tracing::trace!(
            tracked = stats.tracked,
            enqueued = stats.enqueued,
            loaded = stats.loaded,
            evicted = stats.evicted,
            "terrain update complete"
        );
        self.stats = stats;
        &self.stats
    }

    /// Toggle wireframe on every resident tile and on tiles that load later.
    pub fn set_wireframe(&mut self, enabled: bool, scene: &mut dyn SceneSink) {
        if self.wireframe == enabled {
            return;
        }
        self.wireframe = enabled;
        for tile in self.tiles.values_mut() {
            tile.set_wireframe(enabled, scene);
        }
        tracing::debug!(enabled, "wireframe toggled");
    }

    /// Ground height at a planar point, if the tile under it is resident.
    pub fn height_at(&self, point: DVec2) -> Option<f64> {
        self.tiles.get(&self.grid.tile_at(point))?.height_at(point)
    }

    /// Drop every tile: detach resident ones, abandon in-flight loads and
    /// empty the queue. The field can be updated again afterwards.
    pub fn clear(&mut self, scene: &mut dyn SceneSink) {
        let mut coords: Vec<TileCoord> = self.tiles.keys().copied().collect();
        coords.sort();
        for coord in coords {
            if let Some(mut tile) = self.tiles.remove(&coord) {
                if tile.state() == TileState::Loaded {
                    if let Err(err) = tile.evict(scene) {
                        tracing::warn!(%err, "evict during clear failed");
                    }
                }
            }
        }
        self.queue.clear();
        // Dropping the pool drops in-flight loads and whatever they held.
        self.pool = LocalPool::new();
        self.spawner = self.pool.spawner();
        while let Some(Some(outcome)) = self.outcomes_rx.next().now_or_never() {
            drop(outcome);
        }
        tracing::info!("terrain field cleared");
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn timer(&self) -> &UpdateTimer {
        &self.timer
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn tracked_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn queue(&self) -> &FetchQueue {
        &self.queue
    }

    pub fn count(&self, state: TileState) -> usize {
        self.tiles.values().filter(|t| t.state() == state).count()
    }

    fn install_finished(&mut self, scene: &mut dyn SceneSink, stats: &mut StreamStats) {
        self.pool.run_until_stalled();
        while let Some(Some(LoadOutcome { tile: coord, result })) =
            self.outcomes_rx.next().now_or_never()
        {
            let Some(tile) = self.tiles.get_mut(&coord) else {
                tracing::warn!(tile = %coord, "load finished for untracked tile");
                continue;
            };
            if let Err(err) = tile.complete_load(result, scene) {
                tracing::warn!(%err, "stale load outcome dropped");
                continue;
            }
            if tile.state() == TileState::Loaded {
                stats.loaded += 1;
                if self.wireframe {
                    tile.set_wireframe(true, scene);
                }
            } else {
                stats.failed += 1;
            }
        }
    }

    fn enqueue_visible(&mut self, position: DVec2, distance: f64, stats: &mut StreamStats) {
        let queue = &mut self.queue;
        for (coord, _) in self.grid.tiles_within(position, distance) {
            let tile = match self.tiles.entry(coord) {
                Entry::Vacant(slot) => slot.insert(Tile::new(
                    self.grid.footprint(coord),
                    Rc::clone(&self.registry),
                )),
                Entry::Occupied(slot) => slot.into_mut(),
            };
            // Fresh tiles and tiles whose last load failed.
            if tile.enqueue(queue) {
                stats.enqueued += 1;
            }
        }
    }

    fn evict_distant(
        &mut self,
        position: DVec2,
        distance: f64,
        scene: &mut dyn SceneSink,
        stats: &mut StreamStats,
    ) {
        let evict_beyond = self.config.evict_distance(distance);
        let mut doomed = Vec::new();
        for (coord, tile) in self.tiles.iter_mut() {
            let d = tile.bounds().planar_distance(position);
            match tile.state() {
                TileState::Loaded if d > evict_beyond => doomed.push(*coord),
                TileState::Queued if d > evict_beyond => {
                    if tile.cancel(&mut self.queue) {
                        stats.cancelled += 1;
                    }
                    doomed.push(*coord);
                }
                // Failed loads outside the view distance are not retried.
                TileState::Unloaded => doomed.push(*coord),
                _ => {}
            }
        }
        doomed.sort();
        for coord in doomed {
            let Some(mut tile) = self.tiles.remove(&coord) else {
                continue;
            };
            if tile.state() == TileState::Loaded {
                match tile.evict(scene) {
                    Ok(()) => stats.evicted += 1,
                    Err(err) => tracing::warn!(%err, "evict failed"),
                }
            }
        }
    }

    fn dispatch(&mut self, scene: &mut dyn SceneSink, stats: &mut StreamStats) {
        while stats.dispatched < self.config.loads_per_frame {
            let Some(coord) = self.queue.drain_one() else {
                break;
            };
            let Some(tile) = self.tiles.get_mut(&coord) else {
                continue;
            };
            let load = match tile.begin_load() {
                Ok(load) => load,
                Err(err) => {
                    tracing::warn!(%err, "queued tile not loadable");
                    continue;
                }
            };
            let tx = self.outcomes_tx.clone();
            let spawned = self.spawner.spawn_local(async move {
                let result = load.await;
                // Receiver lives as long as the field.
                let _ = tx.unbounded_send(LoadOutcome { tile: coord, result });
            });
            if let Err(err) = spawned {
                tracing::error!(tile = %coord, %err, "could not spawn tile load");
                if let Err(err) = tile.complete_load(Err(LoadError::Abandoned), scene) {
                    tracing::warn!(%err, "abandon failed");
                }
                continue;
            }
            stats.dispatched += 1;
        }
    }
}

impl std::fmt::Debug for TerrainField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainField")
            .field("frame", &self.frame)
            .field("tracked", &self.tiles.len())
            .field("queued", &self.queue.len())
            .field("wireframe", &self.wireframe)
            .finish_non_exhaustive()
    }
}
