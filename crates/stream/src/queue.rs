use std::collections::VecDeque;

use terrastream_common::TileCoord;

/// FIFO of tiles waiting to start loading.
///
/// Tiles guard their own state, so a coordinate is only pushed while its tile
/// moves Unloaded → Queued. `push` still refuses an immediate repeat.
#[derive(Debug, Default)]
pub struct FetchQueue {
    pending: VecDeque<TileCoord>,
    pushed_total: u64,
    cancelled_total: u64,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `coord`. Returns false if it is already at the back.
    pub fn push(&mut self, coord: TileCoord) -> bool {
        if self.pending.back() == Some(&coord) {
            return false;
        }
        self.pending.push_back(coord);
        self.pushed_total += 1;
        true
    }

    /// Remove and return the oldest entry.
    pub fn drain_one(&mut self) -> Option<TileCoord> {
        self.pending.pop_front()
    }

    /// Remove a still-waiting entry. Returns false if it was not queued.
    pub fn cancel(&mut self, coord: TileCoord) -> bool {
        match self.pending.iter().position(|c| *c == coord) {
            Some(i) => {
                self.pending.remove(i);
                self.cancelled_total += 1;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.pending.contains(&coord)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileCoord> {
        self.pending.iter()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pushed_total(&self) -> u64 {
        self.pushed_total
    }

    pub fn cancelled_total(&self) -> u64 {
        self.cancelled_total
    }
}
