/// Bounded snapshot history
///
/// Oldest-first retention of raw snapshots for chart consumption. This is the
/// only structure in the engine that grows with the stream, so it is also the
/// memory bound for everything derived from it.
use crate::types::{ObservedAt, Snapshot};
use std::collections::{HashSet, VecDeque, vec_deque};

/// Default number of snapshots retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// Create a buffer holding at most `capacity` snapshots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a snapshot, returning the evicted oldest one when full.
    pub fn append(&mut self, snapshot: Snapshot) -> Option<Snapshot> {
        let evicted = if self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front()
        } else {
            None
        };
        self.snapshots.push_back(snapshot);
        evicted
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    /// Every retained snapshot, oldest first.
    pub fn all(&self) -> vec_deque::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The retained snapshot observed at `timestamp`.
    pub fn get_mut(&mut self, timestamp: ObservedAt) -> Option<&mut Snapshot> {
        self.snapshots
            .iter_mut()
            .find(|snapshot| snapshot.timestamp == Some(timestamp))
    }

    /// Observation times still referenced by a retained snapshot.
    pub fn timestamps(&self) -> HashSet<ObservedAt> {
        self.snapshots
            .iter()
            .filter_map(|snapshot| snapshot.timestamp)
            .collect()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
