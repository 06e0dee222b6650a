//! Basic benchmarks for the `slab_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::alloc::Layout;
use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use slab_pool::{ensure_initialized, lock_free_table, locking_table};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const PAYLOAD_SIZE: usize = 64;

fn entrypoint(c: &mut Criterion) {
    ensure_initialized();

    let mut group = c.benchmark_group("sp_acquire_release");

    group.bench_function("locking", |b| {
        let table = locking_table();
        b.iter(|| {
            let address = table.acquire(PAYLOAD_SIZE).unwrap();
            black_box(address);
            // SAFETY: freshly acquired, released exactly once.
            unsafe { table.release(address, PAYLOAD_SIZE) };
        });
    });

    group.bench_function("lock_free", |b| {
        let table = lock_free_table();
        b.iter(|| {
            let address = table.acquire(PAYLOAD_SIZE).unwrap();
            black_box(address);
            // SAFETY: freshly acquired, released exactly once.
            unsafe { table.release(address, PAYLOAD_SIZE) };
        });
    });

    group.bench_function("system", |b| {
        let layout = Layout::from_size_align(PAYLOAD_SIZE, 8).unwrap();
        b.iter(|| {
            // SAFETY: non-zero-size layout; freed exactly once below.
            unsafe {
                let address = std::alloc::alloc(layout);
                black_box(address);
                std::alloc::dealloc(address, layout);
            }
        });
    });

    group.finish();

    let mut group = c.benchmark_group("sp_burst");

    // A thousand live allocations before the first release, then drain -
    // exercises the bump path on the way up and the free list on every
    // later iteration.
    group.bench_function("locking_thousand", |b| {
        let table = locking_table();
        b.iter(|| {
            let addresses: Vec<_> = (0..1_000).map(|_| table.acquire(PAYLOAD_SIZE).unwrap()).collect();
            for address in addresses {
                // SAFETY: each address is acquired above and released once.
                unsafe { table.release(address, PAYLOAD_SIZE) };
            }
        });
    });

    group.bench_function("lock_free_thousand", |b| {
        let table = lock_free_table();
        b.iter(|| {
            let addresses: Vec<_> = (0..1_000).map(|_| table.acquire(PAYLOAD_SIZE).unwrap()).collect();
            for address in addresses {
                // SAFETY: each address is acquired above and released once.
                unsafe { table.release(address, PAYLOAD_SIZE) };
            }
        });
    });

    group.bench_function("system_thousand", |b| {
        let layout = Layout::from_size_align(PAYLOAD_SIZE, 8).unwrap();
        b.iter(|| {
            // SAFETY: non-zero-size layout; every pointer freed exactly once.
            unsafe {
                let addresses: Vec<_> = (0..1_000).map(|_| std::alloc::alloc(layout)).collect();
                for address in addresses {
                    std::alloc::dealloc(address, layout);
                }
            }
        });
    });

    group.finish();

    let mut group = c.benchmark_group("sp_mixed_sizes");

    // Walk every size class so dispatch cost and per-class free lists both
    // show up.
    group.bench_function("lock_free_sweep", |b| {
        let table = lock_free_table();
        b.iter(|| {
            for size in (8..=512).step_by(8) {
                let address = table.acquire(size).unwrap();
                black_box(address);
                // SAFETY: freshly acquired, released exactly once.
                unsafe { table.release(address, size) };
            }
        });
    });

    group.finish();
}
