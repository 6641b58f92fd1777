use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use glam::DVec2;
use lru::LruCache;
use serde::Serialize;
use terrastream_geo::{CoordinateTransform, GeoPoint};

use crate::loader::{LoadError, LoadFuture};

/// Remote source of most-detailed terrain elevation.
pub trait ElevationProvider {
    /// False when the provider cannot serve requests at all (missing
    /// credentials, offline mode). Callers then skip it entirely.
    fn is_available(&self) -> bool {
        true
    }

    /// Elevations in meters for `points`, in the same order.
    fn sample_most_detailed(&self, points: &[GeoPoint]) -> LoadFuture<Vec<f64>>;
}

/// Quantized planar position used as a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElevationKey {
    east: i64,
    north: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
    pub sentinel_samples: u64,
    /// Misses answered by a request another caller already had outstanding.
    pub in_flight_joins: u64,
}

/// One provider request, shared by every caller waiting on its keys.
type PendingBatch = Shared<LocalBoxFuture<'static, Rc<BatchOutcome>>>;

struct InFlight {
    batch: u64,
    index: usize,
    future: PendingBatch,
}

/// Provider response in request order. Non-finite or missing heights are
/// `None` and resolve to the sea-level sentinel.
struct BatchOutcome {
    keys: Vec<ElevationKey>,
    samples: Vec<Option<f64>>,
    error: Option<String>,
}

impl BatchOutcome {
    fn new(keys: Vec<ElevationKey>, result: Result<Vec<f64>, LoadError>) -> Self {
        let (samples, error) = match result {
            Ok(heights) if heights.len() == keys.len() => (
                heights
                    .into_iter()
                    .map(|h| h.is_finite().then_some(h))
                    .collect(),
                None,
            ),
            Ok(heights) => (
                vec![None; keys.len()],
                Some(format!(
                    "provider returned {} samples for {} points",
                    heights.len(),
                    keys.len()
                )),
            ),
            Err(err) => (vec![None; keys.len()], Some(err.to_string())),
        };
        Self {
            keys,
            samples,
            error,
        }
    }
}

/// Memoizing front for an [`ElevationProvider`].
///
/// Keys are planar positions rounded to `10^-precision` units, so nearby
/// requests (shared tile edges, repeated probes) collapse onto one entry.
/// Samples that fail or come back non-finite are answered with `0.0` and
/// never cached, so a later request retries the provider. Concurrent misses
/// on the same key share one provider request.
///
/// Interior mutability only: the cache is shared by `Rc` between in-flight
/// tile loads on the update thread, and no borrow is held across an await.
pub struct ElevationCache {
    provider: Rc<dyn ElevationProvider>,
    transform: Rc<dyn CoordinateTransform>,
    scale: f64,
    entries: RefCell<LruCache<ElevationKey, f64>>,
    in_flight: RefCell<HashMap<ElevationKey, InFlight>>,
    next_batch: Cell<u64>,
    stats: Cell<CacheStats>,
    warned_unavailable: Cell<bool>,
}

impl ElevationCache {
    pub fn new(
        provider: Rc<dyn ElevationProvider>,
        transform: Rc<dyn CoordinateTransform>,
        precision: u32,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        let entries = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            provider,
            transform,
            scale: 10f64.powi(precision as i32),
            entries: RefCell::new(entries),
            in_flight: RefCell::new(HashMap::new()),
            next_batch: Cell::new(0),
            stats: Cell::new(CacheStats::default()),
            warned_unavailable: Cell::new(false),
        }
    }

    pub fn key(&self, point: DVec2) -> ElevationKey {
        ElevationKey {
            east: (point.x * self.scale).round() as i64,
            north: (point.y * self.scale).round() as i64,
        }
    }

    /// Cached elevation, if present.
    pub fn get(&self, point: DVec2) -> Option<f64> {
        let key = self.key(point);
        self.entries.borrow_mut().get(&key).copied()
    }

    pub fn put(&self, point: DVec2, elevation: f64) {
        let key = self.key(point);
        self.entries.borrow_mut().put(key, elevation);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.get()
    }

    pub async fn sample(&self, point: DVec2) -> f64 {
        let values = self.sample_many(&[point]).await;
        values.first().copied().unwrap_or(0.0)
    }

    /// Elevations for `points`, in order.
    ///
    /// Misses are fetched from the provider in one batch, one request per
    /// distinct key. Keys another caller is already fetching join that
    /// request instead of issuing a new one.
    pub async fn sample_many(&self, points: &[DVec2]) -> Vec<f64> {
        let mut values = vec![0.0; points.len()];
        // (slot in `values`, batch id, index within the batch)
        let mut awaiting: Vec<(usize, u64, usize)> = Vec::new();
        let mut batches: HashMap<u64, PendingBatch> = HashMap::new();
        let mut misses: Vec<(ElevationKey, DVec2)> = Vec::new();
        let mut fresh: HashMap<ElevationKey, Vec<usize>> = HashMap::new();

        {
            let mut entries = self.entries.borrow_mut();
            let in_flight = self.in_flight.borrow();
            let mut stats = self.stats.get();
            for (i, point) in points.iter().enumerate() {
                let key = self.key(*point);
                if let Some(h) = entries.get(&key) {
                    values[i] = *h;
                    stats.hits += 1;
                    continue;
                }
                stats.misses += 1;
                if let Some(pending) = in_flight.get(&key) {
                    stats.in_flight_joins += 1;
                    batches
                        .entry(pending.batch)
                        .or_insert_with(|| pending.future.clone());
                    awaiting.push((i, pending.batch, pending.index));
                    continue;
                }
                let slots = fresh.entry(key).or_default();
                if slots.is_empty() {
                    misses.push((key, *point));
                }
                slots.push(i);
            }
            self.stats.set(stats);
        }

        if !misses.is_empty() && !self.provider.is_available() {
            if !self.warned_unavailable.replace(true) {
                tracing::warn!("elevation provider unavailable; using 0.0 for all samples");
            }
            self.count_sentinels(misses.len());
        } else if !misses.is_empty() {
            let id = self.next_batch.get();
            self.next_batch.set(id + 1);
            let keys: Vec<ElevationKey> = misses.iter().map(|(key, _)| *key).collect();
            let geo: Vec<GeoPoint> = misses
                .iter()
                .map(|(_, p)| self.transform.to_geographic(*p))
                .collect();
            self.bump(|s| s.provider_calls += 1);
            let request = self
                .provider
                .sample_most_detailed(&geo)
                .map(move |result| Rc::new(BatchOutcome::new(keys, result)))
                .boxed_local()
                .shared();

            let mut in_flight = self.in_flight.borrow_mut();
            for (index, (key, _)) in misses.iter().enumerate() {
                in_flight.insert(
                    *key,
                    InFlight {
                        batch: id,
                        index,
                        future: request.clone(),
                    },
                );
                for slot in &fresh[key] {
                    awaiting.push((*slot, id, index));
                }
            }
            batches.insert(id, request);
        }

        if batches.is_empty() {
            return values;
        }

        let pending: Vec<(u64, PendingBatch)> = batches.into_iter().collect();
        let outcomes = future::join_all(pending.iter().map(|(_, f)| f.clone())).await;
        let mut settled: HashMap<u64, Rc<BatchOutcome>> = HashMap::new();
        for ((id, _), outcome) in pending.iter().zip(outcomes) {
            self.settle(*id, &outcome);
            settled.insert(*id, outcome);
        }
        for (slot, batch, index) in awaiting {
            values[slot] = settled
                .get(&batch)
                .and_then(|outcome| outcome.samples.get(index).copied().flatten())
                .unwrap_or(0.0);
        }
        values
    }

    /// Number of keys with a provider request outstanding.
    pub fn in_flight(&self) -> usize {
        self.in_flight.borrow().len()
    }

    /// Retires a finished batch from the in-flight table. Only the first
    /// caller to see the outcome caches it and records its stats.
    fn settle(&self, batch: u64, outcome: &BatchOutcome) {
        let mut first = false;
        {
            let mut in_flight = self.in_flight.borrow_mut();
            for key in &outcome.keys {
                if in_flight.get(key).is_some_and(|p| p.batch == batch) {
                    in_flight.remove(key);
                    first = true;
                }
            }
        }
        if !first {
            return;
        }

        let mut sentinels = 0;
        {
            let mut entries = self.entries.borrow_mut();
            for (key, sample) in outcome.keys.iter().zip(&outcome.samples) {
                match sample {
                    Some(h) => {
                        entries.put(*key, *h);
                    }
                    None => sentinels += 1,
                }
            }
        }
        match &outcome.error {
            Some(err) => {
                tracing::warn!(
                    %err,
                    samples = outcome.keys.len(),
                    "elevation request failed; using 0.0"
                );
                self.bump(|s| s.provider_failures += 1);
            }
            None if sentinels > 0 => {
                tracing::warn!(samples = sentinels, "non-finite elevations; using 0.0");
            }
            None => {}
        }
        self.count_sentinels(sentinels);
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn count_sentinels(&self, n: usize) {
        self.bump(|s| s.sentinel_samples += n as u64);
    }
}

impl std::fmt::Debug for ElevationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevationCache")
            .field("scale", &self.scale)
            .field("len", &self.len())
            .field("in_flight", &self.in_flight())
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{GatedElevation, RecordingElevation};
    use futures::executor::{LocalPool, block_on};
    use futures::task::LocalSpawnExt;
    use terrastream_geo::LinearDegrees;

    fn cache(provider: Rc<RecordingElevation>, capacity: Option<usize>) -> ElevationCache {
        ElevationCache::new(
            provider,
            Rc::new(LinearDegrees::default()),
            1,
            capacity.and_then(NonZeroUsize::new),
        )
    }

    #[test]
    fn repeated_sample_hits_provider_once() {
        let provider = Rc::new(RecordingElevation::plane(0.5, 10.0));
        let cache = cache(Rc::clone(&provider), None);

        let a = block_on(cache.sample(DVec2::new(100.0, 200.0)));
        // Same 0.1 m cell.
        let b = block_on(cache.sample(DVec2::new(100.04, 199.96)));
        assert_eq!(a, b);
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn distinct_cells_are_distinct_keys() {
        let cache = cache(Rc::new(RecordingElevation::plane(1.0, 0.0)), None);
        assert_ne!(
            cache.key(DVec2::new(10.0, 10.0)),
            cache.key(DVec2::new(10.1, 10.0))
        );
        assert_eq!(
            cache.key(DVec2::new(10.0, 10.0)),
            cache.key(DVec2::new(10.049, 9.951))
        );
    }

    #[test]
    fn batch_dedupes_shared_points() {
        let provider = Rc::new(RecordingElevation::plane(1.0, 0.0));
        let cache = cache(Rc::clone(&provider), None);
        let points = [
            DVec2::new(1.0, 0.0),
            DVec2::new(2.0, 0.0),
            DVec2::new(1.0, 0.0),
        ];
        let values = block_on(cache.sample_many(&points));
        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.points_requested(), 2);
        assert_eq!(values[0], values[2]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn warm_batch_skips_provider() {
        let provider = Rc::new(RecordingElevation::plane(1.0, 0.0));
        let cache = cache(Rc::clone(&provider), None);
        cache.put(DVec2::new(5.0, 5.0), 42.0);
        let values = block_on(cache.sample_many(&[DVec2::new(5.0, 5.0)]));
        assert_eq!(values, vec![42.0]);
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn failure_returns_sentinel_and_is_not_cached() {
        let provider = Rc::new(RecordingElevation::plane(1.0, 100.0));
        provider.set_failing(true);
        let cache = cache(Rc::clone(&provider), None);
        let p = DVec2::new(3.0, 4.0);

        assert_eq!(block_on(cache.sample(p)), 0.0);
        assert!(cache.get(p).is_none());
        assert_eq!(cache.stats().provider_failures, 1);

        provider.set_failing(false);
        let h = block_on(cache.sample(p));
        assert!(h > 0.0);
        assert_eq!(provider.calls(), 2);
        assert_eq!(cache.get(p), Some(h));
    }

    #[test]
    fn non_finite_samples_fall_back_and_are_not_cached() {
        let provider = Rc::new(RecordingElevation::plane(1.0, 100.0));
        provider.set_non_finite(true);
        let cache = cache(Rc::clone(&provider), None);
        let (nan_point, good_point) = (DVec2::new(3.0, 0.0), DVec2::new(8.0, 0.0));

        let values = block_on(cache.sample_many(&[nan_point, good_point]));
        assert_eq!(values[0], 0.0);
        assert!(values[1] > 100.0);
        assert!(cache.get(nan_point).is_none());
        assert_eq!(cache.get(good_point), Some(values[1]));
        assert_eq!(cache.stats().sentinel_samples, 1);
        assert_eq!(cache.stats().provider_failures, 0);

        provider.set_non_finite(false);
        let h = block_on(cache.sample(nan_point));
        assert!(h > 100.0);
        assert_eq!(provider.calls(), 2);
        assert_eq!(cache.get(nan_point), Some(h));
    }

    fn spawn_sample(
        pool: &LocalPool,
        cache: &Rc<ElevationCache>,
        points: Vec<DVec2>,
        out: &Rc<RefCell<Vec<Vec<f64>>>>,
    ) {
        let (cache, out) = (Rc::clone(cache), Rc::clone(out));
        pool.spawner()
            .spawn_local(async move {
                let values = cache.sample_many(&points).await;
                out.borrow_mut().push(values);
            })
            .unwrap();
    }

    fn gated_cache(provider: &Rc<GatedElevation>) -> Rc<ElevationCache> {
        Rc::new(ElevationCache::new(
            Rc::clone(provider) as Rc<dyn ElevationProvider>,
            Rc::new(LinearDegrees::default()),
            1,
            None,
        ))
    }

    #[test]
    fn concurrent_misses_share_one_request() {
        let provider = Rc::new(GatedElevation::default());
        let cache = gated_cache(&provider);
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut pool = LocalPool::new();

        spawn_sample(&pool, &cache, vec![DVec2::new(100.0, 200.0)], &results);
        spawn_sample(&pool, &cache, vec![DVec2::new(100.02, 200.0)], &results);
        pool.run_until_stalled();
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.in_flight(), 1);
        assert!(results.borrow().is_empty());

        assert_eq!(provider.resolve_all(7.0), 1);
        pool.run_until_stalled();
        assert_eq!(*results.borrow(), vec![vec![7.0], vec![7.0]]);
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.get(DVec2::new(100.0, 200.0)), Some(7.0));
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(cache.stats().in_flight_joins, 1);
    }

    #[test]
    fn overlapping_batches_only_request_new_keys() {
        let provider = Rc::new(GatedElevation::default());
        let cache = gated_cache(&provider);
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut pool = LocalPool::new();
        let (a, b, c) = (
            DVec2::new(0.0, 0.0),
            DVec2::new(10.0, 0.0),
            DVec2::new(20.0, 0.0),
        );

        spawn_sample(&pool, &cache, vec![a, b], &results);
        spawn_sample(&pool, &cache, vec![b, c], &results);
        pool.run_until_stalled();
        assert_eq!(provider.request_sizes(), vec![2, 1]);

        provider.resolve_all(3.0);
        pool.run_until_stalled();
        assert_eq!(results.borrow().len(), 2);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn failed_shared_request_is_not_cached() {
        let provider = Rc::new(GatedElevation::default());
        let cache = gated_cache(&provider);
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut pool = LocalPool::new();
        let p = DVec2::new(50.0, 50.0);

        spawn_sample(&pool, &cache, vec![p], &results);
        spawn_sample(&pool, &cache, vec![p], &results);
        pool.run_until_stalled();
        provider.fail_all();
        pool.run_until_stalled();

        assert_eq!(*results.borrow(), vec![vec![0.0], vec![0.0]]);
        assert!(cache.get(p).is_none());
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.stats().provider_failures, 1);
        assert_eq!(cache.stats().sentinel_samples, 1);

        spawn_sample(&pool, &cache, vec![p], &results);
        pool.run_until_stalled();
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn short_response_is_treated_as_failure() {
        let provider = Rc::new(RecordingElevation::plane(1.0, 100.0));
        provider.set_truncate(true);
        let cache = cache(Rc::clone(&provider), None);
        let values = block_on(cache.sample_many(&[DVec2::new(0.0, 0.0), DVec2::new(50.0, 0.0)]));
        assert_eq!(values, vec![0.0, 0.0]);
        assert!(cache.is_empty());
    }

    #[test]
    fn unavailable_provider_is_never_called() {
        let provider = Rc::new(RecordingElevation::plane(1.0, 100.0));
        provider.set_available(false);
        let cache = cache(Rc::clone(&provider), None);
        assert_eq!(block_on(cache.sample(DVec2::new(1.0, 1.0))), 0.0);
        assert_eq!(block_on(cache.sample(DVec2::new(2.0, 1.0))), 0.0);
        assert_eq!(provider.calls(), 0);
        assert_eq!(cache.stats().sentinel_samples, 2);
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let cache = cache(Rc::new(RecordingElevation::plane(1.0, 0.0)), Some(2));
        cache.put(DVec2::new(1.0, 0.0), 1.0);
        cache.put(DVec2::new(2.0, 0.0), 2.0);
        assert_eq!(cache.get(DVec2::new(1.0, 0.0)), Some(1.0));
        cache.put(DVec2::new(3.0, 0.0), 3.0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(DVec2::new(2.0, 0.0)), None);
        assert_eq!(cache.get(DVec2::new(1.0, 0.0)), Some(1.0));
    }
}
