//! Black-box collaborator interfaces.
//!
//! The on-disk segment format, manifest search, transaction commit driver,
//! and distributed lock manager are all external to this cache. Each is
//! expressed as a narrow trait so a test harness can supply deterministic
//! fakes without the cache depending on any particular backing
//! implementation.

use icache_core::{Key, Result};

/// An item read from the manifest during a miss, ready to be handed to
/// `insert_batch`. Carries only what `insert_batch` needs: the batch
/// reader has already decided these keys are persistent.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// The item's key.
    pub key: Key,
    /// The item's value, if any.
    pub value: Option<Vec<u8>>,
    /// Whether this batched entry represents a deletion tombstone.
    pub deletion: bool,
}

/// External index of segments, consulted on a coverage miss:
/// `read_items(k, lock.start, lock.end) -> {ok | err}`; on success it must
/// have invoked `insert_batch` with a range covering at least the
/// smallest subrange around `k` it could determine.
///
/// The trait models this contract directly: `read_items` takes a callback
/// invoked with the batch and the range it covers, so the manifest
/// implementation (not the cache) decides how wide a window it could
/// determine, while the cache still drives calling `insert_batch` under
/// its own lock.
pub trait Manifest {
    /// Read items for `k` bounded by `[lock_start, lock_end]`, invoking
    /// `on_batch` with the items found (ascending key order) and the
    /// range they cover. Returns `Err` if the read itself failed
    /// (`IO_ERROR`); the cache does not retry automatically.
    fn read_items(
        &self,
        k: Key,
        lock_start: Key,
        lock_end: Key,
        on_batch: &mut dyn FnMut(Vec<BatchItem>, Key, Key),
    ) -> Result<()>;
}

/// An immutable on-disk sorted item container being assembled at commit:
/// `append(key, val, flags) -> bool`; `fits_single(n_items, n_bytes) ->
/// bool`.
pub trait Segment {
    /// Append one item. `deletion` carries the deletion flag. Returns
    /// `false` if the segment is full and could not accept the item.
    fn append(&mut self, key: Key, value: Option<&[u8]>, deletion: bool) -> bool;

    /// Would a segment with `n_items` dirty items and `n_bytes` of dirty
    /// value bytes still fit as a single segment? Used by
    /// `dirty_fits_single` to pre-check before a commit attempt.
    fn fits_single(&self, n_items: usize, n_bytes: usize) -> bool;
}

/// The transaction commit driver's dirty-accounting side:
/// `track_item(delta_items, delta_bytes)`; `sync(wait) -> int`.
pub trait TransactionTracker {
    /// Publish a delta in dirty item/byte counts, as every mutation that
    /// changes dirty state or value length must.
    fn track_item(&self, delta_items: i64, delta_bytes: i64);

    /// Force (or request) a commit. `wait = true` blocks until the commit
    /// completes; `wait = false` requests one without waiting. Returns an
    /// implementation-defined status code, propagated verbatim.
    fn sync(&self, wait: bool) -> i32;
}

/// The memory-pressure broker's registration surface for the shrinker.
/// `setup` registers a shrinker with the broker at mount; `destroy`
/// unregisters it at unmount.
pub trait ShrinkerRegistry {
    /// Register a shrinker callback to be invoked under memory pressure
    /// with a scan target `nr`. Returns an opaque registration token.
    fn register(&self) -> u64;

    /// Unregister a previously registered shrinker by its token.
    fn unregister(&self, token: u64);
}
