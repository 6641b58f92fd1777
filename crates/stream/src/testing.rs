//! Test doubles shared by the module tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::FutureExt;
use terrastream_common::TileCoord;
use terrastream_geo::{GeoPoint, LinearDegrees};
use terrastream_mesh::MeshData;
use terrastream_render::TextureData;

use crate::elevation::ElevationProvider;
use crate::loader::{
    GeometryProvider, GeometrySource, HeightSource, ImageryProvider, ImageryRequest, LoadError,
    LoadFuture, LoaderRegistry, PlaceholderImagery,
};

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Elevation provider over a plane `base + slope * east`, counting requests.
pub(crate) struct RecordingElevation {
    slope: f64,
    base: f64,
    calls: Cell<usize>,
    points: Cell<usize>,
    failing: Cell<bool>,
    truncate: Cell<bool>,
    non_finite: Cell<bool>,
    available: Cell<bool>,
}

impl RecordingElevation {
    pub(crate) fn plane(slope: f64, base: f64) -> Self {
        Self {
            slope,
            base,
            calls: Cell::new(0),
            points: Cell::new(0),
            failing: Cell::new(false),
            truncate: Cell::new(false),
            non_finite: Cell::new(false),
            available: Cell::new(true),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }

    pub(crate) fn points_requested(&self) -> usize {
        self.points.get()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub(crate) fn set_truncate(&self, truncate: bool) {
        self.truncate.set(truncate);
    }

    /// Answer NaN for the first point of every request.
    pub(crate) fn set_non_finite(&self, non_finite: bool) {
        self.non_finite.set(non_finite);
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.set(available);
    }
}

impl ElevationProvider for RecordingElevation {
    fn is_available(&self) -> bool {
        self.available.get()
    }

    fn sample_most_detailed(&self, points: &[GeoPoint]) -> LoadFuture<Vec<f64>> {
        self.calls.set(self.calls.get() + 1);
        self.points.set(self.points.get() + points.len());
        let result = if self.failing.get() {
            Err(LoadError::Network("connection reset".into()))
        } else {
            let mut heights: Vec<f64> = points
                .iter()
                .map(|p| self.base + self.slope * p.lon * METERS_PER_DEGREE)
                .collect();
            if self.truncate.get() {
                heights.pop();
            }
            if self.non_finite.get() && !heights.is_empty() {
                heights[0] = f64::NAN;
            }
            Ok(heights)
        };
        futures::future::ready(result).boxed_local()
    }
}

/// Elevation provider whose requests stay pending until the test answers them.
#[derive(Default)]
pub(crate) struct GatedElevation {
    pending: RefCell<Vec<(usize, oneshot::Sender<Result<Vec<f64>, LoadError>>)>>,
    request_sizes: RefCell<Vec<usize>>,
}

impl GatedElevation {
    pub(crate) fn calls(&self) -> usize {
        self.request_sizes.borrow().len()
    }

    pub(crate) fn points_requested(&self) -> usize {
        self.request_sizes.borrow().iter().sum()
    }

    pub(crate) fn request_sizes(&self) -> Vec<usize> {
        self.request_sizes.borrow().clone()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Answers every outstanding request with `height` at each point.
    pub(crate) fn resolve_all(&self, height: f64) -> usize {
        let pending: Vec<_> = self.pending.borrow_mut().drain(..).collect();
        let n = pending.len();
        for (len, tx) in pending {
            let _ = tx.send(Ok(vec![height; len]));
        }
        n
    }

    pub(crate) fn fail_all(&self) -> usize {
        let pending: Vec<_> = self.pending.borrow_mut().drain(..).collect();
        let n = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(LoadError::Network("elevation timeout".into())));
        }
        n
    }
}

impl ElevationProvider for GatedElevation {
    fn sample_most_detailed(&self, points: &[GeoPoint]) -> LoadFuture<Vec<f64>> {
        let (tx, rx) = oneshot::channel();
        self.request_sizes.borrow_mut().push(points.len());
        self.pending.borrow_mut().push((points.len(), tx));
        async move { rx.await.unwrap_or(Err(LoadError::Abandoned)) }.boxed_local()
    }
}

/// Pre-baked geometry served from an in-memory map.
#[derive(Default)]
pub(crate) struct MapGeometry {
    payloads: RefCell<HashMap<String, Vec<u8>>>,
    requested: RefCell<Vec<String>>,
}

impl MapGeometry {
    pub(crate) fn insert(&self, key: &str, payload: Vec<u8>) {
        self.payloads.borrow_mut().insert(key.to_string(), payload);
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }

    /// Flat two-triangle square at height `z` covering `[0, extent]^2`.
    pub(crate) fn quad(extent: f32, z: f32) -> MeshData {
        MeshData::from_buffers(
            &[
                [0.0, 0.0, z],
                [extent, 0.0, z],
                [extent, extent, z],
                [0.0, extent, z],
            ],
            None,
            vec![0, 1, 2, 0, 2, 3],
        )
        .unwrap()
    }
}

impl GeometryProvider for MapGeometry {
    fn fetch(&self, key: &str) -> LoadFuture<Vec<u8>> {
        self.requested.borrow_mut().push(key.to_string());
        let result = self
            .payloads
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| LoadError::Network(format!("404 for {key}")));
        futures::future::ready(result).boxed_local()
    }
}

/// Imagery whose requests stay pending until the test resolves or fails them.
#[derive(Default)]
pub(crate) struct GatedImagery {
    pending: RefCell<HashMap<TileCoord, oneshot::Sender<Result<TextureData, LoadError>>>>,
}

impl GatedImagery {
    pub(crate) fn is_pending(&self, tile: TileCoord) -> bool {
        self.pending.borrow().contains_key(&tile)
    }

    pub(crate) fn resolve(&self, tile: TileCoord) -> bool {
        self.send(tile, TextureData::solid(2, 2, [0, 255, 0, 255]).map_err(LoadError::from))
    }

    pub(crate) fn fail(&self, tile: TileCoord) -> bool {
        self.send(tile, Err(LoadError::Network("imagery timeout".into())))
    }

    fn send(&self, tile: TileCoord, result: Result<TextureData, LoadError>) -> bool {
        match self.pending.borrow_mut().remove(&tile) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

impl ImageryProvider for GatedImagery {
    fn fetch(&self, request: &ImageryRequest) -> LoadFuture<TextureData> {
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().insert(request.tile, tx);
        async move { rx.await.unwrap_or(Err(LoadError::Abandoned)) }.boxed_local()
    }
}

/// Imagery that always fails immediately.
pub(crate) struct FailingImagery;

impl ImageryProvider for FailingImagery {
    fn fetch(&self, _request: &ImageryRequest) -> LoadFuture<TextureData> {
        futures::future::ready(Err(LoadError::Network("unreachable".into()))).boxed_local()
    }
}

pub(crate) fn small_placeholder() -> PlaceholderImagery {
    PlaceholderImagery {
        size: 4,
        cells: 2,
        ..PlaceholderImagery::default()
    }
}

pub(crate) fn registry_with(
    heights: HeightSource,
    imagery: Rc<dyn ImageryProvider>,
    resolution: u32,
) -> LoaderRegistry {
    LoaderRegistry::new(
        GeometrySource::Heightfield(heights),
        imagery,
        Rc::new(LinearDegrees::default()),
        resolution,
    )
}

pub(crate) fn flat_registry(resolution: u32) -> LoaderRegistry {
    registry_with(HeightSource::flat(0.0), Rc::new(small_placeholder()), resolution)
}
