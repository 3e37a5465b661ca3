//! Telemetry counters: named event increments (lookup_hit, lookup_miss,
//! range_hit, range_miss, shrink, ...) as a closed enumeration.
//!
//! This stays a fixed `enum` plus a plain struct of `u64` tallies rather
//! than a generic metrics-registry crate: the closed set of events is
//! exactly what a Rust `enum` expresses, and a hand-rolled counters struct
//! is plenty when the only consumer is internal introspection.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// One of the closed set of telemetry events the cache emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterEvent {
    /// `lookup` resolved to a present, non-tombstone item.
    LookupHit,
    /// `lookup` resolved to `NOT_FOUND` via range coverage (no manifest read).
    LookupMiss,
    /// `next`/`prev` resolved within cached coverage.
    RangeHit,
    /// `next`/`prev` had to extend past cached coverage.
    RangeMiss,
    /// A manifest read was triggered by the miss loop.
    ManifestRead,
    /// The shrinker evicted at least one item.
    Shrink,
    /// An item was appended to a segment during commit.
    CommitAppend,
}

const EVENT_COUNT: usize = 7;

fn event_index(event: CounterEvent) -> usize {
    match event {
        CounterEvent::LookupHit => 0,
        CounterEvent::LookupMiss => 1,
        CounterEvent::RangeHit => 2,
        CounterEvent::RangeMiss => 3,
        CounterEvent::ManifestRead => 4,
        CounterEvent::Shrink => 5,
        CounterEvent::CommitAppend => 6,
    }
}

/// Atomically-incremented tallies for each [`CounterEvent`], safe to share
/// across callers operating under different lock acquisitions.
#[derive(Debug, Default)]
pub struct CacheCounters {
    tallies: [AtomicU64; EVENT_COUNT],
}

impl CacheCounters {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `event` by one.
    pub fn record(&self, event: CounterEvent) {
        self.tallies[event_index(event)].fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Current tally for `event`.
    pub fn get(&self, event: CounterEvent) -> u64 {
        self.tallies[event_index(event)].load(AtomicOrdering::Relaxed)
    }
}

/// A point-in-time snapshot of cache introspection data, distinct from the
/// telemetry counters above: `nr_dirty_items`/`dirty_val_bytes` are
/// invariants the cache itself must keep consistent, not free-running
/// event tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of items currently in the item map.
    pub nr_items: usize,
    /// Number of SELF-dirty items.
    pub nr_dirty_items: usize,
    /// Sum of `value_len` over all SELF-dirty items.
    pub dirty_val_bytes: usize,
    /// Number of disjoint ranges in the range map.
    pub nr_ranges: usize,
    /// Number of items currently eligible for eviction (in the LRU).
    pub nr_evictable: usize,
}
