//! # itemcache
//!
//! The in-memory item cache of a clustered, log-structured filesystem.
//!
//! This is the facade crate: it re-exports the public surface assembled by
//! `icache-cache` (the cache itself, its external-collaborator traits, and
//! its telemetry types) and `icache-core` (the key type, error set, and
//! tunable limits). Internal module layout — the arena-based augmented
//! treap, the range map, the LRU, the shrinker — lives in `icache-cache`
//! and is not meant to be depended on directly by callers outside this
//! workspace; only the surface re-exported here is stable.
//!
//! ```
//! use itemcache::{ItemCache, Limits, LockMode};
//!
//! # struct NullManifest;
//! # impl itemcache::Manifest for NullManifest {
//! #     fn read_items(
//! #         &self,
//! #         _k: itemcache::Key,
//! #         lock_start: itemcache::Key,
//! #         lock_end: itemcache::Key,
//! #         on_batch: &mut dyn FnMut(Vec<itemcache::BatchItem>, itemcache::Key, itemcache::Key),
//! #     ) -> itemcache::Result<()> {
//! #         on_batch(Vec::new(), lock_start, lock_end);
//! #         Ok(())
//! #     }
//! # }
//! # struct NullTracker;
//! # impl itemcache::TransactionTracker for NullTracker {
//! #     fn track_item(&self, _delta_items: i64, _delta_bytes: i64) {}
//! #     fn sync(&self, _wait: bool) -> i32 { 0 }
//! # }
//! # struct FixedLock(itemcache::LockMode, itemcache::Key, itemcache::Key);
//! # impl itemcache::Lock for FixedLock {
//! #     fn mode(&self) -> itemcache::LockMode { self.0 }
//! #     fn start(&self) -> itemcache::Key { self.1 }
//! #     fn end(&self) -> itemcache::Key { self.2 }
//! # }
//! let cache = ItemCache::new(Limits::default(), Box::new(NullManifest), Box::new(NullTracker));
//! let lock = FixedLock(LockMode::Write, 0u64.into(), 100u64.into());
//! cache.create(&lock, 1u64.into(), b"hello".to_vec())?;
//! let mut buf = [0u8; 16];
//! let n = cache.lookup(&lock, 1u64.into(), &mut buf)?;
//! assert_eq!(&buf[..n], b"hello");
//! # Ok::<(), itemcache::CacheError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use icache_cache::{
    BatchItem, CacheCounters, CacheStats, CounterEvent, DirtyBits, Item, ItemCache, Lock,
    LockMode, Manifest, Range, RangeMap, SavedItem, Segment, ShrinkerRegistry, TransactionTracker,
};
pub use icache_core::{CacheError, Key, Limits, Result};
