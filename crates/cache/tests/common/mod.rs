//! Shared test fixtures for the item cache's integration test suites.
//!
//! Deterministic fake implementations of the external collaborators
//! (`Lock`, `Manifest`, `Segment`, `TransactionTracker`) the cache treats
//! as black-box dependencies. Import via `mod common;` from any test file
//! in this directory.

#![allow(dead_code)]

use icache_cache::{BatchItem, Lock, LockMode, Manifest, Segment, TransactionTracker};
use icache_core::{Key, Result};
use std::sync::Mutex;

/// A lock covering a fixed `[start, end]` range at a fixed mode, the way a
/// caller's real lock object would look once acquired.
pub struct FixedLock {
    pub mode: LockMode,
    pub start: Key,
    pub end: Key,
}

impl FixedLock {
    pub fn new(mode: LockMode, start: u64, end: u64) -> Self {
        FixedLock {
            mode,
            start: Key::from(start),
            end: Key::from(end),
        }
    }

    pub fn full(mode: LockMode) -> Self {
        FixedLock {
            mode,
            start: Key::MIN,
            end: Key::MAX,
        }
    }
}

impl Lock for FixedLock {
    fn mode(&self) -> LockMode {
        self.mode
    }
    fn start(&self) -> Key {
        self.start
    }
    fn end(&self) -> Key {
        self.end
    }
}

/// A manifest that reports every key within the requested window as
/// genuinely absent — used by tests that expect the miss loop to resolve
/// purely via negative coverage.
pub struct EmptyManifest;

impl Manifest for EmptyManifest {
    fn read_items(
        &self,
        _k: Key,
        lock_start: Key,
        lock_end: Key,
        on_batch: &mut dyn FnMut(Vec<BatchItem>, Key, Key),
    ) -> Result<()> {
        on_batch(Vec::new(), lock_start, lock_end);
        Ok(())
    }
}

/// A manifest backed by a fixed in-memory table, filtering to the
/// requested window on every read.
pub struct TableManifest {
    pub items: Vec<(Key, Vec<u8>)>,
}

impl Manifest for TableManifest {
    fn read_items(
        &self,
        _k: Key,
        lock_start: Key,
        lock_end: Key,
        on_batch: &mut dyn FnMut(Vec<BatchItem>, Key, Key),
    ) -> Result<()> {
        let batch: Vec<BatchItem> = self
            .items
            .iter()
            .filter(|(k, _)| *k >= lock_start && *k <= lock_end)
            .map(|(k, v)| BatchItem {
                key: *k,
                value: Some(v.clone()),
                deletion: false,
            })
            .collect();
        on_batch(batch, lock_start, lock_end);
        Ok(())
    }
}

/// A transaction tracker that records every delta it is handed, for tests
/// that assert on the dirty-accounting side channel threaded through
/// every mutation.
#[derive(Default)]
pub struct RecordingTracker {
    pub deltas: Mutex<Vec<(i64, i64)>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_items(&self) -> i64 {
        self.deltas.lock().unwrap().iter().map(|(items, _)| *items).sum()
    }

    pub fn total_bytes(&self) -> i64 {
        self.deltas.lock().unwrap().iter().map(|(_, bytes)| *bytes).sum()
    }
}

impl TransactionTracker for RecordingTracker {
    fn track_item(&self, delta_items: i64, delta_bytes: i64) {
        self.deltas.lock().unwrap().push((delta_items, delta_bytes));
    }
    fn sync(&self, _wait: bool) -> i32 {
        0
    }
}

/// An in-memory stand-in for the on-disk segment being assembled at
/// commit, bounded to `capacity` entries so `dirty_fits_single` has
/// something meaningful to check.
pub struct VecSegment {
    pub entries: Vec<(Key, Option<Vec<u8>>, bool)>,
    pub capacity: usize,
}

impl VecSegment {
    pub fn new(capacity: usize) -> Self {
        VecSegment {
            entries: Vec::new(),
            capacity,
        }
    }
}

impl Segment for VecSegment {
    fn append(&mut self, key: Key, value: Option<&[u8]>, deletion: bool) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push((key, value.map(|v| v.to_vec()), deletion));
        true
    }
    fn fits_single(&self, n_items: usize, _n_bytes: usize) -> bool {
        n_items <= self.capacity
    }
}

pub fn key(v: u64) -> Key {
    Key::from(v)
}
