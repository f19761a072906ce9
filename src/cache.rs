//! Aggregation cache: a concurrent `(user_id, event_type) -> count` map.
//!
//! Built on `dashmap`'s internally-sharded map rather than a single
//! coarse lock, so concurrent increments to different keys never
//! contend (design note in §9: "do not take a single coarse lock across
//! the whole increment path").
//!
//! Drain policy is **subtract-on-remove** (spec §4.1): a flush snapshots
//! the live count for each key, writes it to the store, and then
//! subtracts exactly that amount back out of the live counter. Any
//! increment that lands between snapshot and subtract is preserved
//! because it was added to the same `i64` the subtraction acts on.

use dashmap::DashMap;

use crate::domain::UserEventStats;

type Key = (i64, String);

#[derive(Default)]
pub struct AggregationCache {
    counters: DashMap<Key, i64>,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Increment the counter for `(user_id, event_type)`, creating it at
    /// 1 if absent. Returns the count after the increment.
    ///
    /// `DashMap::entry` takes the shard lock for the key's bucket only,
    /// so this is linearizable per key without blocking unrelated keys
    /// or the flush mutex held elsewhere.
    pub fn increment(&self, user_id: i64, event_type: &str) -> i64 {
        let mut entry = self
            .counters
            .entry((user_id, event_type.to_string()))
            .or_insert(0);
        *entry += 1;
        *entry
    }

    /// A point-in-time copy of every non-zero counter. Subsequent
    /// mutations to the live map do not alter the returned stats.
    pub fn snapshot(&self) -> Vec<UserEventStats> {
        self.counters
            .iter()
            .filter(|e| *e.value() > 0)
            .map(|e| {
                let (user_id, event_type) = e.key().clone();
                UserEventStats::with_count(user_id, event_type, *e.value())
                    .expect("counters are never negative")
            })
            .collect()
    }

    /// Subtract the snapshotted count back out of each key's live
    /// counter, removing the key entirely once it reaches zero. A key
    /// incremented again after the snapshot was taken keeps its
    /// remaining (post-subtraction) count in the cache for the next tick.
    pub fn remove_drained(&self, snapshot: &[UserEventStats]) {
        for stats in snapshot {
            let key = (stats.user_id, stats.event_type.clone());
            let mut remove = false;
            if let Some(mut entry) = self.counters.get_mut(&key) {
                *entry -= stats.count();
                if *entry <= 0 {
                    remove = true;
                }
            }
            if remove {
                // Re-check under the entry API: another increment may have
                // landed between the drop of `entry` above and here.
                self.counters.remove_if(&key, |_, count| *count <= 0);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn size(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn increment_creates_and_accumulates() {
        let cache = AggregationCache::new();
        assert_eq!(cache.increment(1, "click"), 1);
        assert_eq!(cache.increment(1, "click"), 2);
        assert_eq!(cache.increment(1, "hover"), 1);
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn concurrent_increments_to_same_key_never_lose_updates() {
        let cache = Arc::new(AggregationCache::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    cache.increment(1, "click");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].count(), 800);
    }

    #[test]
    fn snapshot_is_a_point_in_time_copy() {
        let cache = AggregationCache::new();
        cache.increment(1, "click");
        let snap = cache.snapshot();
        cache.increment(1, "click");
        assert_eq!(snap[0].count(), 1);
    }

    #[test]
    fn remove_drained_preserves_increments_after_snapshot() {
        let cache = AggregationCache::new();
        cache.increment(1, "click");
        cache.increment(1, "click");
        let snap = cache.snapshot();
        assert_eq!(snap[0].count(), 2);

        // Simulate an increment racing with the in-flight flush.
        cache.increment(1, "click");

        cache.remove_drained(&snap);
        assert_eq!(cache.size(), 1);
        let remaining = cache.snapshot();
        assert_eq!(remaining[0].count(), 1);
    }

    #[test]
    fn remove_drained_removes_fully_drained_keys() {
        let cache = AggregationCache::new();
        cache.increment(1, "click");
        let snap = cache.snapshot();
        cache.remove_drained(&snap);
        assert!(cache.is_empty());
    }

    #[test]
    fn empty_cache_snapshot_is_empty() {
        let cache = AggregationCache::new();
        assert!(cache.snapshot().is_empty());
    }
}
