//! Benchmarks for SectorKV store operations

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use sectorkv::{MemoryFlash, Store, StoreConfig};

fn fresh_store() -> Store<MemoryFlash> {
    let flash = MemoryFlash::with_sectors(4096, 8, 16);
    Store::open(flash, StoreConfig::default()).unwrap()
}

fn store_benchmarks(c: &mut Criterion) {
    // Steady-state rewrites of a handful of keys, GC included
    c.bench_function("put_rewrite", |b| {
        let mut store = fresh_store();
        let mut i = 0u32;
        b.iter(|| {
            let key = format!("key{}", i % 8);
            store.put(key.as_bytes(), &i.to_le_bytes()).unwrap();
            i = i.wrapping_add(1);
        })
    });

    c.bench_function("get", |b| {
        let mut store = fresh_store();
        for i in 0..64 {
            store.put(format!("key{}", i).as_bytes(), &[0xAB; 32]).unwrap();
        }
        let mut i = 0;
        b.iter(|| {
            let key = format!("key{}", i % 64);
            black_box(store.get(key.as_bytes()).unwrap());
            i += 1;
        })
    });

    // Attach cost for a partition with many superseded entries
    c.bench_function("recovery_scan", |b| {
        let mut store = fresh_store();
        for i in 0..1000u32 {
            store
                .put(format!("key{}", i % 32).as_bytes(), &i.to_le_bytes())
                .unwrap();
        }
        let flash = store.into_flash();
        b.iter_batched(
            || flash.clone(),
            |flash| black_box(Store::open(flash, StoreConfig::default()).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, store_benchmarks);
criterion_main!(benches);
