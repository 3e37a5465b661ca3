//! Memory-pressure eviction.
//!
//! Invoked by the memory pressure broker with a scan target `nr`. Must not
//! allocate — we satisfy that the same way the rest of this crate does,
//! by only ever moving already-owned `Item`/`Range` values between
//! `SlotMap`/`BTreeMap` entries rather than growing fresh buffers on this
//! path.

use crate::counters::{CacheCounters, CounterEvent};
use crate::range::{Range, RangeMap};
use crate::tree::{ItemTree, NodeKey};
use icache_core::{Key, Limits};

/// Run one shrink pass, attempting to reclaim up to `nr` items. Returns
/// the number of items actually evicted.
///
/// Walks the LRU oldest-first. Every item the scan examines is evictable
/// by construction — the LRU only ever holds clean items, and a clean
/// item always has a well-defined shrink window containing at least
/// itself — so this scan never needs to rotate an unevictable item to the
/// LRU tail to make progress; it simply evicts one item per loop iteration
/// until `nr` is exhausted or the LRU is empty.
pub fn shrink(
    tree: &mut ItemTree,
    ranges: &mut RangeMap,
    limits: &Limits,
    nr: usize,
    counters: &CacheCounters,
) -> usize {
    let mut remaining = nr;
    let mut evicted = 0usize;

    while remaining > 0 {
        let Some(origin) = tree.lru_oldest() else {
            break;
        };
        debug_assert!(!tree.get(origin).is_dirty(), "LRU must hold only clean items");

        let origin_key = tree.get(origin).key;
        let Some(range) = ranges.coverage(origin_key) else {
            tree.lru_unlink(origin);
            tree.erase(origin);
            evicted += 1;
            remaining -= 1;
            counters.record(CounterEvent::Shrink);
            continue;
        };

        let window = find_window(tree, range, limits, origin);
        apply_window(tree, ranges, range, &window);

        tree.lru_unlink(origin);
        tree.erase(origin);
        evicted += 1;
        remaining -= 1;
        counters.record(CounterEvent::Shrink);
    }

    // Any range that ended up covering zero items is left by construction
    // of `apply_window` (it always either removes or re-derives ranges
    // directly from evicted windows), so no separate post-pass is needed.
    evicted
}

/// A shrink window. Always a single item (`origin`): the immediate
/// predecessor/successor items in the tree become the range-split
/// boundary rather than being absorbed for batch eviction.
struct Window {
    origin: NodeKey,
    left_neighbor: bool,
    right_neighbor: bool,
}

fn find_window(tree: &ItemTree, range: Range, limits: &Limits, origin: NodeKey) -> Window {
    let origin_key = tree.get(origin).key;
    let left_neighbor = find_neighbor(
        tree,
        limits,
        origin,
        origin_key,
        |t, k| t.predecessor(k),
        |k| k >= range.start,
        |origin_key, candidate_key| origin_key.dec() != candidate_key,
    );
    let right_neighbor = find_neighbor(
        tree,
        limits,
        origin,
        origin_key,
        |t, k| t.successor(k),
        |k| k <= range.end,
        |origin_key, candidate_key| origin_key.inc() != candidate_key,
    );

    Window {
        origin,
        left_neighbor,
        right_neighbor,
    }
}

/// Does a neighbor of `origin` exist along `step`, within `in_range`?
///
/// Looks for the furthest point whose key, when incremented/decremented,
/// does not cross the next neighbor. The immediate predecessor/successor
/// of `origin` is the neighbor as long as there is at least one free key
/// between it and `origin` (checked by `sound_gap`) so the shrunk range's
/// new endpoint lands strictly between them; a genuinely adjacent item
/// (no free key) would make `dec`/`inc` of the new endpoint collide with
/// it, so in that rare case we keep walking past it, up to
/// `limits.boundary_max` hops, looking for one the shrunk range can safely
/// end next to. `limits.boundary_min` has no role in this single-item
/// window (see [`Window`]) — it exists on [`Limits`] for batch-oriented
/// tuning that doesn't apply to this reclaim strategy.
fn find_neighbor(
    tree: &ItemTree,
    limits: &Limits,
    origin: NodeKey,
    origin_key: Key,
    step: impl Fn(&ItemTree, NodeKey) -> Option<NodeKey>,
    in_range: impl Fn(Key) -> bool,
    sound_gap: impl Fn(Key, Key) -> bool,
) -> bool {
    let mut cur = origin;
    let mut steps = 0usize;
    let mut found_any = false;
    loop {
        let Some(candidate) = step(tree, cur) else {
            return found_any;
        };
        let candidate_key = tree.get(candidate).key;
        if !in_range(candidate_key) {
            return found_any;
        }
        found_any = true;
        if sound_gap(origin_key, candidate_key) {
            return true;
        }
        steps += 1;
        if steps >= limits.boundary_max {
            return true;
        }
        cur = candidate;
    }
}

/// Apply the range-coverage adjustment for an established window: no
/// neighbor on either side erases the whole range, a neighbor on one side
/// shrinks it, and neighbors on both sides split it in two.
///
/// In every case this is exactly the removal `[Self::coverage]` for the
/// uncovered side(s) of `origin` — [`RangeMap::remove`] already shrinks or
/// splits the surrounding range as appropriate, so no separate insert is
/// needed here: shrinking the range's end, shrinking its start, or
/// splitting it into two are just what `remove` does when handed a
/// sub-range that touches one edge, the other edge, or neither.
fn apply_window(tree: &ItemTree, ranges: &mut RangeMap, range: Range, window: &Window) {
    let origin_key = tree.get(window.origin).key;

    let to_remove = match (window.left_neighbor, window.right_neighbor) {
        (false, false) => range,
        (true, false) => Range::new(origin_key, range.end),
        (false, true) => Range::new(range.start, origin_key),
        (true, true) => Range::new(origin_key, origin_key),
    };
    ranges.remove(to_remove);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;

    fn key(v: u64) -> Key {
        Key::from(v)
    }

    fn setup_clean_item(tree: &mut ItemTree, v: u64) -> NodeKey {
        let node = tree.insert(Item::new(key(v), Some(vec![v as u8])));
        tree.lru_push_front(node);
        node
    }

    fn setup_dirty_item(tree: &mut ItemTree, v: u64) -> NodeKey {
        let mut item = Item::new(key(v), Some(vec![v as u8]));
        item.dirty.set_self(true);
        tree.insert(item)
    }

    #[test]
    fn uncovered_item_is_erased_immediately() {
        let mut tree = ItemTree::new();
        let mut ranges = RangeMap::new();
        setup_clean_item(&mut tree, 5);
        let limits = Limits::for_testing();
        let counters = CacheCounters::new();

        let evicted = shrink(&mut tree, &mut ranges, &limits, 10, &counters);
        assert_eq!(evicted, 1);
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn shrink_splits_range_with_neighbors_on_both_sides() {
        let mut tree = ItemTree::new();
        let mut ranges = RangeMap::new();
        ranges.insert(Range::new(key(0), key(20)));
        setup_dirty_item(&mut tree, 5);
        let target = setup_clean_item(&mut tree, 7);
        setup_dirty_item(&mut tree, 9);
        let _ = target;

        let limits = Limits {
            boundary_min: 0,
            boundary_max: 300,
            ..Limits::for_testing()
        };
        let counters = CacheCounters::new();

        let evicted = shrink(&mut tree, &mut ranges, &limits, 10, &counters);
        assert_eq!(evicted, 1);

        let remaining: Vec<Range> = ranges.iter().copied().collect();
        assert_eq!(remaining, vec![Range::new(key(0), key(6)), Range::new(key(8), key(20))]);
    }

    #[test]
    fn shrink_erases_whole_range_with_no_neighbors() {
        let mut tree = ItemTree::new();
        let mut ranges = RangeMap::new();
        ranges.insert(Range::new(key(0), key(2)));
        setup_clean_item(&mut tree, 0);
        setup_clean_item(&mut tree, 1);
        setup_clean_item(&mut tree, 2);

        let limits = Limits {
            boundary_min: 0,
            boundary_max: 300,
            ..Limits::for_testing()
        };
        let counters = CacheCounters::new();
        let evicted = shrink(&mut tree, &mut ranges, &limits, 10, &counters);
        assert_eq!(evicted, 3);
        assert!(ranges.is_empty());
    }

    #[test]
    fn shrink_never_evicts_dirty_items() {
        let mut tree = ItemTree::new();
        let mut ranges = RangeMap::new();
        ranges.insert(Range::new(key(0), key(10)));
        setup_dirty_item(&mut tree, 3);
        setup_clean_item(&mut tree, 5);

        let limits = Limits {
            boundary_min: 0,
            boundary_max: 300,
            ..Limits::for_testing()
        };
        let counters = CacheCounters::new();
        shrink(&mut tree, &mut ranges, &limits, 100, &counters);
        assert!(tree.find(key(3)).is_some(), "dirty item must survive shrink");
    }
}
