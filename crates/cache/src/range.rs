//! The range map: negative-cache coverage over the keyspace.
//!
//! A `Range` states that every key inside `[start, end]` has a definitive
//! verdict — present as an item, or known-absent. The map of all ranges is
//! kept as a `BTreeMap` keyed by `start`: a plain `BTreeMap` gives us
//! `range()` queries for free instead of hand-rolling tree descent twice
//! (once for items, once for ranges) when only the item map actually
//! needs the augmented-dirty treap's bespoke traversal.
//!
//! An evicted item and a freshly inserted range are expected to be of
//! comparable size, so the shrinker can replace one with the other without
//! a surprising jump in peak memory; [`crate::item`] carries a
//! `sizeof(Item) >= sizeof(Range)` compile-time check for that (see the
//! `const_assert!` below), and the shrinker simply constructs a new
//! `Range` value rather than reusing a byte buffer — see `crate::shrinker`
//! for the full reclaim path.

use icache_core::Key;
use std::collections::BTreeMap;

static_assertions::const_assert!(
    std::mem::size_of::<crate::item::Item>() >= std::mem::size_of::<Range>()
);

/// A closed interval `[start, end]` of keys all covered by the negative
/// cache: every key within either has an item in the item map, or is known
/// to not exist in the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Inclusive start of the covered interval.
    pub start: Key,
    /// Inclusive end of the covered interval.
    pub end: Key,
}

impl Range {
    /// Build a range, asserting `start <= end` (callers are expected to
    /// have validated this already via `InvalidArg`; this is a last-resort
    /// debug check, not the public validation path).
    pub fn new(start: Key, end: Key) -> Self {
        debug_assert!(start <= end, "range start must not exceed end");
        Range { start, end }
    }

    /// Does this range contain `k`?
    pub fn contains(&self, k: Key) -> bool {
        self.start <= k && k <= self.end
    }

    fn overlaps_or_touches(&self, other: &Range) -> bool {
        // Touching (adjacent) ranges must merge too, so the cover stays
        // non-adjacent as well as non-overlapping.
        let overlaps = self.start <= other.end && other.start <= self.end;
        let adjacent = self.end.inc() == other.start || other.end.inc() == self.start;
        overlaps || adjacent
    }
}

/// The ordered, disjoint, non-adjacent set of covered ranges.
#[derive(Debug, Default)]
pub struct RangeMap {
    by_start: BTreeMap<Key, Range>,
}

impl RangeMap {
    /// An empty range map.
    pub fn new() -> Self {
        RangeMap {
            by_start: BTreeMap::new(),
        }
    }

    /// Number of disjoint ranges currently tracked.
    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    /// Point-in-interval query: the range containing `k`, if any.
    pub fn coverage(&self, k: Key) -> Option<Range> {
        self.by_start
            .range(..=k)
            .next_back()
            .map(|(_, r)| *r)
            .filter(|r| r.contains(k))
    }

    /// Is `k` covered by some range?
    pub fn is_covered(&self, k: Key) -> bool {
        self.coverage(k).is_some()
    }

    /// Insert `r`, merging with any overlapping or touching siblings.
    pub fn insert(&mut self, mut r: Range) {
        loop {
            let overlap_key = self
                .by_start
                .iter()
                .find(|(_, existing)| existing.overlaps_or_touches(&r))
                .map(|(k, _)| *k);

            match overlap_key {
                Some(k) => {
                    let existing = self.by_start.remove(&k).expect("just found");
                    r = Range::new(
                        std::cmp::min(r.start, existing.start),
                        std::cmp::max(r.end, existing.end),
                    );
                }
                None => break,
            }
        }
        self.by_start.insert(r.start, r);
    }

    /// Remove the coverage described by `r`, shrinking or splitting any
    /// range it overlaps.
    ///
    /// Returns the set of ranges left uncovered after the removal, for
    /// callers (`invalidate`) that need to know exactly which sub-ranges
    /// changed.
    pub fn remove(&mut self, r: Range) {
        let overlapping: Vec<Key> = self
            .by_start
            .iter()
            .filter(|(_, existing)| existing.start <= r.end && r.start <= existing.end)
            .map(|(k, _)| *k)
            .collect();

        for start_key in overlapping {
            let existing = self.by_start.remove(&start_key).expect("just found");
            let left_remains = existing.start < r.start;
            let right_remains = existing.end > r.end;

            match (left_remains, right_remains) {
                (false, false) => {
                    // Entirely removed; nothing left of this range.
                }
                (true, false) => {
                    let shrunk = Range::new(existing.start, r.start.dec());
                    self.by_start.insert(shrunk.start, shrunk);
                }
                (false, true) => {
                    let shrunk = Range::new(r.end.inc(), existing.end);
                    self.by_start.insert(shrunk.start, shrunk);
                }
                (true, true) => {
                    // Strictly inside: split into two.
                    let left = Range::new(existing.start, r.start.dec());
                    let right = Range::new(r.end.inc(), existing.end);
                    self.by_start.insert(left.start, left);
                    self.by_start.insert(right.start, right);
                }
            }
        }
    }

    /// Produce the endpoints of ranges from the first range intersecting
    /// or following `k`, up to `out`'s remaining capacity (rounded down to
    /// an even count, since endpoints come in start/end pairs).
    pub fn keys_since(&self, k: Key, out: &mut Vec<Key>) {
        let cap = out.capacity().saturating_sub(out.len());
        let max_ranges = cap / 2;
        if max_ranges == 0 {
            return;
        }
        // "Intersecting or following k": start at the range containing k
        // if one exists, else the first range strictly after k.
        let from = self
            .by_start
            .range(..=k)
            .next_back()
            .filter(|(_, r)| r.contains(k))
            .map(|(start, _)| *start);

        let iter: Box<dyn Iterator<Item = &Range>> = match from {
            Some(start) => Box::new(self.by_start.range(start..).map(|(_, r)| r)),
            None => Box::new(
                self.by_start
                    .range(k..)
                    .map(|(_, r)| r)
                    .filter(move |r| r.start > k || r.contains(k)),
            ),
        };

        for range in iter.take(max_ranges) {
            out.push(range.start);
            out.push(range.end);
        }
    }

    /// All ranges, in ascending-start order. Used by `destroy`'s post-order
    /// teardown and by tests asserting the map stays disjoint and
    /// non-adjacent.
    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.by_start.values()
    }
}
