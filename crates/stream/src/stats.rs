use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use terrastream_render::ResourceCounts;

/// Per-update streaming statistics for instrumentation.
///
/// Counters ending in a verb describe what happened during the last update;
/// the rest are totals observed at its end.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStats {
    pub frame: u64,
    pub view_distance: f64,
    pub enqueued: usize,
    pub dispatched: usize,
    pub loaded: usize,
    pub failed: usize,
    pub evicted: usize,
    pub cancelled: usize,
    pub tracked: usize,
    pub queued: usize,
    pub loading: usize,
    pub resident: usize,
    pub resources: ResourceCounts,
    pub update_time: Duration,
}

impl StreamStats {
    /// True once nothing is waiting or in flight.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.loading == 0
    }
}

impl std::fmt::Display for StreamStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frame {}: tracked={} resident={} loading={} queued={} \
             (+{} queued, {} dispatched, {} loaded, {} failed, {} evicted, {} cancelled) in {:?}",
            self.frame,
            self.tracked,
            self.resident,
            self.loading,
            self.queued,
            self.enqueued,
            self.dispatched,
            self.loaded,
            self.failed,
            self.evicted,
            self.cancelled,
            self.update_time
        )
    }
}

/// Rolling window of update durations.
#[derive(Debug, Clone)]
pub struct UpdateTimer {
    history: VecDeque<Duration>,
    capacity: usize,
}

impl UpdateTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(dt);
    }

    pub fn average(&self) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }
        self.history.iter().sum::<Duration>() / self.history.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.history.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.history.iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn last(&self) -> Option<Duration> {
        self.history.back().copied()
    }

    pub fn count(&self) -> usize {
        self.history.len()
    }
}

impl Default for UpdateTimer {
    fn default() -> Self {
        Self::new(120)
    }
}
