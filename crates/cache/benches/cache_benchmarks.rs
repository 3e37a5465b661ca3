//! Microbenchmarks for the cache's hot paths: the item map
//! (lookup/create), the augmented dirty index (`first_dirty`/`next_dirty`
//! traversal at commit), and the shrinker's boundary walk.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use icache_cache::{BatchItem, ItemCache, Lock, LockMode, Manifest, Segment, TransactionTracker};
use icache_core::{Key, Limits, Result};

struct EmptyManifest;

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

struct NullTracker;

impl TransactionTracker for NullTracker {
    fn track_item(&self, _delta_items: i64, _delta_bytes: i64) {}
    fn sync(&self, _wait: bool) -> i32 {
        0
    }
}

struct FullRangeLock(LockMode);

impl Lock for FullRangeLock {
    fn mode(&self) -> LockMode {
        self.0
    }
    fn start(&self) -> Key {
        Key::MIN
    }
    fn end(&self) -> Key {
        Key::MAX
    }
}

struct VecSegment {
    entries: usize,
    capacity: usize,
}

impl VecSegment {
    fn new(capacity: usize) -> Self {
        VecSegment { entries: 0, capacity }
    }
}

impl Segment for VecSegment {
    fn append(&mut self, _key: Key, _value: Option<&[u8]>, _deletion: bool) -> bool {
        if self.entries >= self.capacity {
            return false;
        }
        self.entries += 1;
        true
    }
    fn fits_single(&self, n_items: usize, _n_bytes: usize) -> bool {
        n_items <= self.capacity
    }
}

fn make_cache() -> ItemCache {
    ItemCache::new(Limits::default(), Box::new(EmptyManifest), Box::new(NullTracker))
}

fn bench_create_and_lookup(c: &mut Criterion) {
    const COUNT: u64 = 10_000;
    let mut group = c.benchmark_group("item_map");
    group.throughput(Throughput::Elements(COUNT));

    group.bench_function("create_sequential", |b| {
        b.iter(|| {
            let cache = make_cache();
            let lock = FullRangeLock(LockMode::Write);
            for i in 0..COUNT {
                cache
                    .create(&lock, Key::from(i), black_box(vec![0u8; 32]))
                    .unwrap();
            }
        });
    });

    group.bench_function("lookup_hit", |b| {
        let cache = make_cache();
        let write_lock = FullRangeLock(LockMode::Write);
        for i in 0..COUNT {
            cache.create(&write_lock, Key::from(i), vec![0u8; 32]).unwrap();
        }
        let read_lock = FullRangeLock(LockMode::Read);
        let mut buf = [0u8; 32];
        b.iter(|| {
            for i in 0..COUNT {
                black_box(cache.lookup(&read_lock, Key::from(i), &mut buf).unwrap());
            }
        });
    });

    group.finish();
}

fn bench_dirty_traversal(c: &mut Criterion) {
    const COUNT: u64 = 10_000;
    let mut group = c.benchmark_group("dirty_index");
    group.throughput(Throughput::Elements(COUNT));

    group.bench_function("dirty_seg_commit", |b| {
        b.iter_batched(
            || {
                let cache = make_cache();
                let lock = FullRangeLock(LockMode::Write);
                for i in 0..COUNT {
                    cache.create(&lock, Key::from(i), vec![0u8; 16]).unwrap();
                }
                cache
            },
            |cache| {
                let mut seg = VecSegment::new(COUNT as usize + 1);
                cache.dirty_seg(&mut seg).unwrap();
                black_box(seg.entries);
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_shrinker(c: &mut Criterion) {
    const COUNT: u64 = 5_000;
    let mut group = c.benchmark_group("shrinker");
    group.throughput(Throughput::Elements(COUNT));

    group.bench_function("boundary_walk_clean_items", |b| {
        b.iter_batched(
            || {
                let cache = make_cache();
                let lock = FullRangeLock(LockMode::Write);
                for i in 0..COUNT {
                    cache.create(&lock, Key::from(i), vec![0u8; 16]).unwrap();
                }
                let mut seg = VecSegment::new(COUNT as usize + 1);
                cache.dirty_seg(&mut seg).unwrap();
                cache
            },
            |cache| {
                black_box(cache.shrink(COUNT as usize));
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_create_and_lookup, bench_dirty_traversal, bench_shrinker);
criterion_main!(benches);
