//! `ItemCache`: the public surface assembling the item map, range map,
//! LRU/shrinker, and lock-coverage checks into one cohesive API.
//!
//! All cache state lives behind a single `parking_lot::Mutex` rather than
//! the standard library's: no poisoning on panic, and a smaller, faster
//! uncontended fast path, which matters here since every public operation
//! takes this lock.

use crate::counters::{CacheCounters, CacheStats, CounterEvent};
use crate::external::{BatchItem, Manifest, Segment, ShrinkerRegistry, TransactionTracker};
use crate::item::Item;
use crate::lock::{assert_covers, assert_covers_range, Lock, LockMode};
use crate::range::{Range, RangeMap};
use crate::tree::{ItemTree, NodeKey};
use icache_core::{CacheError, Key, Limits, Result};
use parking_lot::Mutex;

/// An item removed from the cache by [`ItemCache::delete_save`], carrying
/// its dirty status so [`ItemCache::restore`] can splice it back without
/// losing track of whether it still needs a commit:
/// `delete_save(k, L); restore(L); lookup(k) == original`.
#[derive(Debug, Clone)]
pub struct SavedItem(Item);

impl SavedItem {
    /// The key of the saved item.
    pub fn key(&self) -> Key {
        self.0.key
    }
}

struct Inner {
    tree: ItemTree,
    ranges: RangeMap,
    nr_dirty_items: usize,
    dirty_val_bytes: usize,
}

impl Inner {
    fn new() -> Self {
        Inner {
            tree: ItemTree::new(),
            ranges: RangeMap::new(),
            nr_dirty_items: 0,
            dirty_val_bytes: 0,
        }
    }

    /// Set SELF-dirty on `node` and update the dirty counters, unless it
    /// was dirty already. Every mutation that changes dirty state or
    /// value length updates `nr_dirty_items` and `dirty_val_bytes` and
    /// publishes a delta to the external transaction tracker.
    fn mark_dirty(&mut self, tracker: &dyn TransactionTracker, node: NodeKey) {
        if self.tree.get(node).is_dirty() {
            return;
        }
        self.tree.lru_unlink(node);
        self.tree.set_self_dirty(node, true);
        let len = self.tree.get(node).value_len();
        self.nr_dirty_items += 1;
        self.dirty_val_bytes += len;
        tracker.track_item(1, len as i64);
    }

    /// Clear SELF-dirty on `node`, move it back onto the LRU, and update
    /// the dirty counters. No-op if already clean.
    fn mark_clean(&mut self, tracker: &dyn TransactionTracker, node: NodeKey) {
        if !self.tree.get(node).is_dirty() {
            return;
        }
        let len = self.tree.get(node).value_len();
        self.tree.set_self_dirty(node, false);
        self.nr_dirty_items -= 1;
        self.dirty_val_bytes -= len;
        tracker.track_item(-1, -(len as i64));
        self.tree.lru_push_front(node);
    }

    /// Account for a value-length change on an already-dirty item.
    fn adjust_dirty_bytes(&mut self, tracker: &dyn TransactionTracker, old_len: usize, new_len: usize) {
        if old_len == new_len {
            return;
        }
        let delta = new_len as i64 - old_len as i64;
        self.dirty_val_bytes = (self.dirty_val_bytes as i64 + delta) as usize;
        tracker.track_item(0, delta);
    }
}

/// The item cache. One instance per mount: construct with
/// [`ItemCache::new`], call [`ItemCache::setup`] to register with the
/// memory-pressure broker, and [`ItemCache::destroy`] at unmount.
pub struct ItemCache {
    inner: Mutex<Inner>,
    manifest: Box<dyn Manifest + Send + Sync>,
    tracker: Box<dyn TransactionTracker + Send + Sync>,
    counters: CacheCounters,
    limits: Limits,
}

impl ItemCache {
    /// Construct a cache with the given tunables and external
    /// collaborators.
    pub fn new(
        limits: Limits,
        manifest: Box<dyn Manifest + Send + Sync>,
        tracker: Box<dyn TransactionTracker + Send + Sync>,
    ) -> Self {
        tracing::debug!(?limits, "item cache constructed");
        ItemCache {
            inner: Mutex::new(Inner::new()),
            manifest,
            tracker,
            counters: CacheCounters::new(),
            limits,
        }
    }

    /// Register this cache's shrinker with the memory-pressure broker.
    pub fn setup(&self, registry: &dyn ShrinkerRegistry) -> u64 {
        tracing::debug!("item cache registering with memory broker");
        registry.register()
    }

    /// Unmount: unregister the shrinker, then free all items and ranges.
    /// No augmentation bookkeeping is needed since nothing will query the
    /// cache again, so this simply replaces the tree and range map
    /// outright rather than erasing node by node.
    pub fn destroy(&self, registry: &dyn ShrinkerRegistry, token: u64) {
        registry.unregister(token);
        let mut inner = self.inner.lock();
        *inner = Inner::new();
        tracing::debug!("item cache destroyed");
    }

    /// Look up the value at `k`. Copies the item's value into `buf`
    /// (truncated to its length) and returns the number of bytes copied.
    pub fn lookup(&self, lock: &dyn Lock, k: Key, buf: &mut [u8]) -> Result<usize> {
        tracing::trace!(key = ?k, "lookup");
        assert_covers(lock, LockMode::Read, k)?;
        loop {
            enum Outcome {
                Hit(usize),
                NotFound,
                NeedsRead,
            }

            let outcome = {
                let mut inner = self.inner.lock();
                if let Some(node) = inner.tree.find(k) {
                    let item = inner.tree.get(node);
                    if item.deletion {
                        Outcome::NotFound
                    } else {
                        let value = item.value().unwrap_or(&[]);
                        let n = value.len().min(buf.len());
                        buf[..n].copy_from_slice(&value[..n]);
                        if !item.is_dirty() {
                            inner.tree.lru_touch(node);
                        }
                        Outcome::Hit(n)
                    }
                } else if inner.ranges.is_covered(k) {
                    Outcome::NotFound
                } else {
                    Outcome::NeedsRead
                }
            };

            return match outcome {
                Outcome::Hit(n) => {
                    self.counters.record(CounterEvent::LookupHit);
                    Ok(n)
                }
                Outcome::NotFound => {
                    self.counters.record(CounterEvent::LookupMiss);
                    Err(CacheError::NotFound { key: k })
                }
                Outcome::NeedsRead => {
                    self.read_through(lock, k)?;
                    continue;
                }
            };
        }
    }

    /// The smallest item key > `k`, ≤ `last` (narrowed to the lock's
    /// `end`), skipping deletion items.
    pub fn next(&self, lock: &dyn Lock, k: Key, last: Key) -> Result<(Key, Vec<u8>)> {
        tracing::trace!(key = ?k, last = ?last, "next");
        assert_covers(lock, LockMode::Read, k)?;
        let last = lock.narrow_last(last);
        let mut cursor = k;
        loop {
            enum Outcome {
                Found(Key, Vec<u8>),
                NotFound,
                Advance(Key),
                NeedsRead,
            }

            let outcome = {
                let mut inner = self.inner.lock();
                let start_node = inner.tree.find(cursor);
                let mut candidate = match start_node {
                    Some(node) => inner.tree.successor(node),
                    None => {
                        let (_, _, succ) = inner.tree.walk(cursor);
                        succ
                    }
                };
                let mut result = None;
                while let Some(node) = candidate {
                    let item_key = inner.tree.get(node).key;
                    if item_key > last {
                        break;
                    }
                    if !inner.tree.get(node).deletion {
                        let value = inner.tree.get(node).value().map(<[u8]>::to_vec).unwrap_or_default();
                        if !inner.tree.get(node).is_dirty() {
                            inner.tree.lru_touch(node);
                        }
                        result = Some(Outcome::Found(item_key, value));
                        break;
                    }
                    candidate = inner.tree.successor(node);
                }

                result.unwrap_or_else(|| match inner.ranges.coverage(cursor) {
                    Some(range) if range.end >= last => Outcome::NotFound,
                    Some(range) => Outcome::Advance(range.end.inc()),
                    None => Outcome::NeedsRead,
                })
            };

            match outcome {
                Outcome::Found(key, value) => {
                    self.counters.record(CounterEvent::RangeHit);
                    return Ok((key, value));
                }
                Outcome::NotFound => {
                    self.counters.record(CounterEvent::RangeHit);
                    return Err(CacheError::NotFound { key: k });
                }
                Outcome::Advance(next_cursor) => {
                    self.counters.record(CounterEvent::RangeMiss);
                    cursor = next_cursor;
                    continue;
                }
                Outcome::NeedsRead => {
                    self.read_through(lock, cursor)?;
                    continue;
                }
            }
        }
    }

    /// The largest item key < `k`, ≥ `first`, symmetric to [`Self::next`].
    pub fn prev(&self, lock: &dyn Lock, k: Key, first: Key) -> Result<(Key, Vec<u8>)> {
        tracing::trace!(key = ?k, first = ?first, "prev");
        assert_covers(lock, LockMode::Read, k)?;
        let first = lock.narrow_first(first);
        let mut cursor = k;
        loop {
            enum Outcome {
                Found(Key, Vec<u8>),
                NotFound,
                Advance(Key),
                NeedsRead,
            }

            let outcome = {
                let mut inner = self.inner.lock();
                let start_node = inner.tree.find(cursor);
                let mut candidate = match start_node {
                    Some(node) => inner.tree.predecessor(node),
                    None => {
                        let (_, pred, _) = inner.tree.walk(cursor);
                        pred
                    }
                };
                let mut result = None;
                while let Some(node) = candidate {
                    let item_key = inner.tree.get(node).key;
                    if item_key < first {
                        break;
                    }
                    if !inner.tree.get(node).deletion {
                        let value = inner.tree.get(node).value().map(<[u8]>::to_vec).unwrap_or_default();
                        if !inner.tree.get(node).is_dirty() {
                            inner.tree.lru_touch(node);
                        }
                        result = Some(Outcome::Found(item_key, value));
                        break;
                    }
                    candidate = inner.tree.predecessor(node);
                }

                result.unwrap_or_else(|| match inner.ranges.coverage(cursor) {
                    Some(range) if range.start <= first => Outcome::NotFound,
                    Some(range) => Outcome::Advance(range.start.dec()),
                    None => Outcome::NeedsRead,
                })
            };

            match outcome {
                Outcome::Found(key, value) => {
                    self.counters.record(CounterEvent::RangeHit);
                    return Ok((key, value));
                }
                Outcome::NotFound => {
                    self.counters.record(CounterEvent::RangeHit);
                    return Err(CacheError::NotFound { key: k });
                }
                Outcome::Advance(next_cursor) => {
                    self.counters.record(CounterEvent::RangeMiss);
                    cursor = next_cursor;
                    continue;
                }
                Outcome::NeedsRead => {
                    self.read_through(lock, cursor)?;
                    continue;
                }
            }
        }
    }

    /// Create a new item at `k` with `value`. Fails if a live item already
    /// exists there.
    pub fn create(&self, lock: &dyn Lock, k: Key, value: Vec<u8>) -> Result<()> {
        tracing::trace!(key = ?k, len = value.len(), "create");
        assert_covers(lock, LockMode::Write, k)?;
        self.limits.validate_val_size(value.len())?;
        loop {
            enum Outcome {
                Done,
                AlreadyExists,
                NeedsRead,
            }
            let outcome = {
                let mut inner = self.inner.lock();
                if let Some(node) = inner.tree.find(k) {
                    if inner.tree.get(node).deletion {
                        let persistent = inner.tree.get(node).persistent;
                        let old_len = inner.tree.get(node).value_len();
                        let was_dirty = inner.tree.get(node).is_dirty();
                        let item = inner.tree.get_mut(node);
                        item.set_value(Some(value.clone()));
                        item.deletion = false;
                        item.persistent = persistent;
                        inner.mark_dirty(self.tracker.as_ref(), node);
                        if was_dirty {
                            inner.adjust_dirty_bytes(self.tracker.as_ref(), old_len, value.len());
                        }
                        Outcome::Done
                    } else {
                        Outcome::AlreadyExists
                    }
                } else if inner.ranges.is_covered(k) {
                    let node = inner.tree.insert(Item::new(k, Some(value.clone())));
                    inner.mark_dirty(self.tracker.as_ref(), node);
                    Outcome::Done
                } else {
                    Outcome::NeedsRead
                }
            };
            return match outcome {
                Outcome::Done => Ok(()),
                Outcome::AlreadyExists => Err(CacheError::AlreadyExists { key: k }),
                Outcome::NeedsRead => {
                    self.read_through(lock, k)?;
                    continue;
                }
            };
        }
    }

    /// Create at `k` without checking coverage; WRITE_ONLY only. A
    /// pre-existing non-tombstone item is a corruption signal.
    pub fn create_force(&self, lock: &dyn Lock, k: Key, value: Vec<u8>) -> Result<()> {
        tracing::trace!(key = ?k, len = value.len(), "create_force");
        assert_covers(lock, LockMode::WriteOnly, k)?;
        self.limits.validate_val_size(value.len())?;
        let mut inner = self.inner.lock();
        if let Some(node) = inner.tree.find(k) {
            if !inner.tree.get(node).deletion {
                tracing::error!(key = ?k, "create_force found a live item where none should exist");
                return Err(CacheError::Corruption {
                    reason: format!("create_force found a live item at {k:?}"),
                });
            }
            let old_len = inner.tree.get(node).value_len();
            let was_dirty = inner.tree.get(node).is_dirty();
            let item = inner.tree.get_mut(node);
            item.set_value(Some(value.clone()));
            item.deletion = false;
            item.persistent = true;
            inner.mark_dirty(self.tracker.as_ref(), node);
            if was_dirty {
                inner.adjust_dirty_bytes(self.tracker.as_ref(), old_len, value.len());
            }
        } else {
            let mut item = Item::new(k, Some(value));
            item.persistent = true;
            let node = inner.tree.insert(item);
            inner.mark_dirty(self.tracker.as_ref(), node);
        }
        Ok(())
    }

    /// Replace the value at `k`. The caller-visible contract is
    /// "preallocate outside the lock, swap under the lock" — `value` is
    /// already an owned, fully-built `Vec<u8>` by the time it reaches
    /// here, so any allocation has already happened on the caller's side;
    /// this method only performs the swap.
    pub fn update(&self, lock: &dyn Lock, k: Key, value: Vec<u8>) -> Result<()> {
        tracing::trace!(key = ?k, len = value.len(), "update");
        assert_covers(lock, LockMode::Write, k)?;
        self.limits.validate_val_size(value.len())?;
        loop {
            enum Outcome {
                Done,
                NotFound,
                NeedsRead,
            }
            let outcome = {
                let mut inner = self.inner.lock();
                if let Some(node) = inner.tree.find(k) {
                    if inner.tree.get(node).deletion {
                        Outcome::NotFound
                    } else {
                        let old_len = inner.tree.get(node).value_len();
                        let was_dirty = inner.tree.get(node).is_dirty();
                        inner.tree.get_mut(node).set_value(Some(value.clone()));
                        inner.mark_dirty(self.tracker.as_ref(), node);
                        if was_dirty {
                            inner.adjust_dirty_bytes(self.tracker.as_ref(), old_len, value.len());
                        }
                        Outcome::Done
                    }
                } else if inner.ranges.is_covered(k) {
                    Outcome::NotFound
                } else {
                    Outcome::NeedsRead
                }
            };
            return match outcome {
                Outcome::Done => Ok(()),
                Outcome::NotFound => Err(CacheError::NotFound { key: k }),
                Outcome::NeedsRead => {
                    self.read_through(lock, k)?;
                    continue;
                }
            };
        }
    }

    /// Delete the item at `k`: a persistent item becomes a tombstone
    /// pending flush, a non-persistent item is erased outright.
    pub fn delete(&self, lock: &dyn Lock, k: Key) -> Result<()> {
        tracing::trace!(key = ?k, "delete");
        assert_covers(lock, LockMode::Write, k)?;
        loop {
            enum Outcome {
                Done,
                NotFound,
                NeedsRead,
            }
            let outcome = {
                let mut inner = self.inner.lock();
                if let Some(node) = inner.tree.find(k) {
                    if inner.tree.get(node).deletion {
                        Outcome::NotFound
                    } else if inner.tree.get(node).persistent {
                        let old_len = inner.tree.get(node).value_len();
                        let was_dirty = inner.tree.get(node).is_dirty();
                        inner.tree.get_mut(node).make_tombstone();
                        inner.mark_dirty(self.tracker.as_ref(), node);
                        if was_dirty {
                            inner.adjust_dirty_bytes(self.tracker.as_ref(), old_len, 0);
                        }
                        Outcome::Done
                    } else {
                        if inner.tree.get(node).is_dirty() {
                            let len = inner.tree.get(node).value_len();
                            inner.nr_dirty_items -= 1;
                            inner.dirty_val_bytes -= len;
                            self.tracker.track_item(-1, -(len as i64));
                        }
                        inner.tree.lru_unlink(node);
                        inner.tree.erase(node);
                        Outcome::Done
                    }
                } else if inner.ranges.is_covered(k) {
                    Outcome::NotFound
                } else {
                    Outcome::NeedsRead
                }
            };
            return match outcome {
                Outcome::Done => Ok(()),
                Outcome::NotFound => Err(CacheError::NotFound { key: k }),
                Outcome::NeedsRead => {
                    self.read_through(lock, k)?;
                    continue;
                }
            };
        }
    }

    /// Install a tombstone at `k` without first reading the item;
    /// WRITE_ONLY only.
    pub fn delete_force(&self, lock: &dyn Lock, k: Key) -> Result<()> {
        tracing::trace!(key = ?k, "delete_force");
        assert_covers(lock, LockMode::WriteOnly, k)?;
        let mut inner = self.inner.lock();
        if let Some(node) = inner.tree.find(k) {
            if inner.tree.get(node).is_dirty() {
                let len = inner.tree.get(node).value_len();
                inner.dirty_val_bytes -= len;
                inner.nr_dirty_items -= 1;
                self.tracker.track_item(-1, -(len as i64));
            } else {
                inner.tree.lru_unlink(node);
            }
            inner.tree.erase(node);
        }
        let node = inner.tree.insert(Item::tombstone(k));
        inner.mark_dirty(self.tracker.as_ref(), node);
        Ok(())
    }

    /// Mark an existing item dirty without changing its value.
    pub fn dirty(&self, lock: &dyn Lock, k: Key) -> Result<()> {
        tracing::trace!(key = ?k, "dirty");
        assert_covers(lock, LockMode::Write, k)?;
        let mut inner = self.inner.lock();
        match inner.tree.find(k) {
            Some(node) => {
                inner.mark_dirty(self.tracker.as_ref(), node);
                Ok(())
            }
            None => Err(CacheError::NotFound { key: k }),
        }
    }

    /// Unlink the item at `k` (preserving dirty status) onto the
    /// caller's list, installing a persistent tombstone in its place.
    pub fn delete_save(&self, lock: &dyn Lock, k: Key, saved: &mut Vec<SavedItem>) -> Result<()> {
        tracing::trace!(key = ?k, "delete_save");
        assert_covers(lock, LockMode::Write, k)?;
        let mut inner = self.inner.lock();
        let Some(node) = inner.tree.find(k) else {
            return Err(CacheError::NotFound { key: k });
        };
        if inner.tree.get(node).is_dirty() {
            let len = inner.tree.get(node).value_len();
            inner.nr_dirty_items -= 1;
            inner.dirty_val_bytes -= len;
        } else {
            inner.tree.lru_unlink(node);
        }
        let removed = inner.tree.erase(node);
        saved.push(SavedItem(removed));

        let tombstone_node = inner.tree.insert(Item::tombstone(k));
        inner.mark_dirty(self.tracker.as_ref(), tombstone_node);
        Ok(())
    }

    /// Atomically reinsert previously saved items into a
    /// still-covered range.
    pub fn restore(&self, lock: &dyn Lock, saved: Vec<SavedItem>) -> Result<()> {
        tracing::trace!(count = saved.len(), "restore");
        let mut inner = self.inner.lock();

        // Validate every item up front: a failure partway through the
        // mutation pass below would leave the cache half-restored.
        for SavedItem(item) in &saved {
            assert_covers(lock, LockMode::Write, item.key)?;
            if !inner.ranges.is_covered(item.key) && inner.tree.find(item.key).is_none() {
                return Err(CacheError::InvalidArg {
                    reason: format!("restore target {:?} is no longer covered", item.key),
                });
            }
            if let Some(placeholder) = inner.tree.find(item.key) {
                if !inner.tree.get(placeholder).deletion {
                    tracing::error!(key = ?item.key, "restore found a live item where a tombstone placeholder was expected");
                    return Err(CacheError::Corruption {
                        reason: format!("restore found a live item at {:?}", item.key),
                    });
                }
            }
        }

        for SavedItem(item) in saved {
            if let Some(placeholder) = inner.tree.find(item.key) {
                if inner.tree.get(placeholder).is_dirty() {
                    let len = inner.tree.get(placeholder).value_len();
                    inner.nr_dirty_items -= 1;
                    inner.dirty_val_bytes -= len;
                } else {
                    inner.tree.lru_unlink(placeholder);
                }
                inner.tree.erase(placeholder);
            }

            let was_dirty = item.is_dirty();
            let value_len = item.value_len();
            let node = inner.tree.insert(item);
            if was_dirty {
                inner.nr_dirty_items += 1;
                inner.dirty_val_bytes += value_len;
                self.tracker.track_item(1, value_len as i64);
            } else {
                inner.tree.lru_push_front(node);
            }
        }
        Ok(())
    }

    /// Erase all items in `[start, end]` (none may be dirty) and remove
    /// the range from coverage.
    pub fn invalidate(&self, lock: &dyn Lock, start: Key, end: Key) -> Result<()> {
        tracing::trace!(start = ?start, end = ?end, "invalidate");
        assert_covers_range(lock, LockMode::Write, start, end)?;
        let mut inner = self.inner.lock();

        let mut to_erase = Vec::new();
        if let Some(mut node) = inner.tree.find(start).or_else(|| {
            let (_, _, succ) = inner.tree.walk(start);
            succ
        }) {
            loop {
                let key = inner.tree.get(node).key;
                if key > end {
                    break;
                }
                if key >= start {
                    if inner.tree.get(node).is_dirty() {
                        tracing::error!(key = ?key, "invalidate found a dirty item inside the target range");
                        return Err(CacheError::Corruption {
                            reason: format!("invalidate found a dirty item at {key:?}"),
                        });
                    }
                    to_erase.push(node);
                }
                match inner.tree.successor(node) {
                    Some(next) => node = next,
                    None => break,
                }
            }
        }

        for node in to_erase {
            inner.tree.lru_unlink(node);
            inner.tree.erase(node);
        }
        inner.ranges.remove(Range::new(start, end));
        Ok(())
    }

    /// Serialize dirty items into `seg` in ascending key order via
    /// [`ItemTree::first_dirty`]/`next_dirty`.
    pub fn dirty_seg(&self, seg: &mut dyn Segment) -> Result<()> {
        tracing::trace!("dirty_seg");
        let mut inner = self.inner.lock();
        let mut cur = inner.tree.first_dirty();
        let mut committed = Vec::new();

        while let Some(node) = cur {
            let (key, value_owned, deletion) = {
                let item = inner.tree.get(node);
                (item.key, item.value().map(<[u8]>::to_vec), item.deletion)
            };
            if !seg.append(key, value_owned.as_deref(), deletion) {
                return Err(CacheError::NoMem {
                    context: "segment full during dirty_seg".into(),
                });
            }
            committed.push(node);
            cur = inner.tree.next_dirty(node);
        }

        let committed_count = committed.len();
        for node in committed {
            inner.mark_clean(self.tracker.as_ref(), node);
            inner.tree.get_mut(node).persistent = true;
            if inner.tree.get(node).deletion {
                inner.tree.lru_unlink(node);
                inner.tree.erase(node);
            }
            self.counters.record(CounterEvent::CommitAppend);
        }
        tracing::debug!(appended = committed_count, "dirty_seg committed");
        Ok(())
    }

    /// Install a batch of persistent items read from the manifest,
    /// covering `[start, end]`. Never replaces an existing cached key —
    /// the existing item wins, since it may be a newer write that
    /// happened during the unlocked read.
    pub fn insert_batch(&self, items: Vec<BatchItem>, start: Key, end: Key) -> Result<()> {
        tracing::trace!(start = ?start, end = ?end, count = items.len(), "insert_batch");
        if start > end {
            return Err(CacheError::InvalidArg {
                reason: format!("batch range start {start:?} exceeds end {end:?}"),
            });
        }
        let mut inner = self.inner.lock();
        inner.ranges.insert(Range::new(start, end));
        for batch_item in items {
            if inner.tree.find(batch_item.key).is_some() {
                // Existing cached item wins; the duplicate batch entry is
                // simply dropped (freed) here.
                continue;
            }
            let mut item = if batch_item.deletion {
                Item::tombstone(batch_item.key)
            } else {
                Item::new(batch_item.key, batch_item.value)
            };
            item.persistent = true;
            let node = inner.tree.insert(item);
            if !inner.tree.get(node).is_dirty() {
                inner.tree.lru_push_front(node);
            }
        }
        Ok(())
    }

    /// Is any item in the cache currently dirty?
    pub fn has_dirty(&self) -> bool {
        self.inner.lock().nr_dirty_items > 0
    }

    /// Is `[start, end]` fully covered, and (if `dirty_only`) does that
    /// span contain at least one dirty item?
    pub fn range_cached(&self, start: Key, end: Key, dirty_only: bool) -> bool {
        let inner = self.inner.lock();
        let covered = inner.ranges.coverage(start).is_some_and(|r| r.end >= end);
        if !covered {
            return false;
        }
        if !dirty_only {
            return true;
        }
        let mut cur = inner.tree.find(start).or_else(|| {
            let (_, _, succ) = inner.tree.walk(start);
            succ
        });
        while let Some(node) = cur {
            let item = inner.tree.get(node);
            if item.key > end {
                break;
            }
            if item.is_dirty() {
                return true;
            }
            cur = inner.tree.successor(node);
        }
        false
    }

    /// Request (and wait for) a commit of the dirty state in
    /// `[start, end]`.
    ///
    /// Defers entirely to the transaction tracker's own `sync`, which owns
    /// whatever serialization against a concurrent commit is needed — see
    /// `DESIGN.md` for the recorded rationale.
    pub fn writeback(&self, lock: &dyn Lock, start: Key, end: Key) -> Result<()> {
        tracing::trace!(start = ?start, end = ?end, "writeback");
        assert_covers_range(lock, LockMode::Write, start, end)?;
        let status = self.tracker.sync(true);
        if status != 0 {
            return Err(CacheError::IoError(format!(
                "writeback sync failed with status {status}"
            )));
        }
        Ok(())
    }

    /// Would a segment still fit as a single commit if `nr_extra` more
    /// dirty items totalling `bytes_extra` more bytes were added?
    pub fn dirty_fits_single(&self, seg: &dyn Segment, nr_extra: usize, bytes_extra: usize) -> bool {
        let inner = self.inner.lock();
        let fits = seg.fits_single(
            inner.nr_dirty_items + nr_extra,
            inner.dirty_val_bytes + bytes_extra,
        );
        if !fits {
            tracing::warn!(
                nr_dirty = inner.nr_dirty_items + nr_extra,
                bytes = inner.dirty_val_bytes + bytes_extra,
                "dirty_fits_single refusing a commit of this size"
            );
        }
        fits
    }

    /// A point-in-time introspection snapshot (supplementary to the
    /// telemetry counters in [`Self::counters`]).
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            nr_items: inner.tree.len(),
            nr_dirty_items: inner.nr_dirty_items,
            dirty_val_bytes: inner.dirty_val_bytes,
            nr_ranges: inner.ranges.len(),
            nr_evictable: inner.tree.lru_len(),
        }
    }

    /// Read-only access to the telemetry counters.
    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Run one shrink pass. See `crate::shrinker`.
    pub fn shrink(&self, nr: usize) -> usize {
        let mut inner = self.inner.lock();
        let Inner {
            tree,
            ranges,
            ..
        } = &mut *inner;
        crate::shrinker::shrink(tree, ranges, &self.limits, nr, &self.counters)
    }

    /// Ask the manifest to read items around `k` bounded by the lock's
    /// range, and install the resulting batch.
    fn read_through(&self, lock: &dyn Lock, k: Key) -> Result<()> {
        tracing::debug!(key = ?k, lock_start = ?lock.start(), lock_end = ?lock.end(), "miss loop: dispatching manifest read");
        self.counters.record(CounterEvent::ManifestRead);
        let mut batch_result = Ok(());
        self.manifest
            .read_items(k, lock.start(), lock.end(), &mut |items, start, end| {
                batch_result = self.insert_batch(items, start, end);
            })?;
        batch_result
    }
}
