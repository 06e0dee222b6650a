//! Multi-threaded soak coverage for both process-wide tables.
#![allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use slab_pool::{
    LockFreeSlabPool, MutexSlabPool, PoolBox, SizeClassTable, SlabPool, lock_free_table,
    locking_table,
};

const THREADS: usize = 8;

#[cfg(miri)]
const ITERATIONS_PER_THREAD: usize = 100;
#[cfg(not(miri))]
const ITERATIONS_PER_THREAD: usize = 25_000;

/// A 64-byte payload whose constructor stamps a checksum pattern and whose
/// destructor verifies it, so any torn write, shared slot or premature reuse
/// turns into a panic.
struct ChecksummedPayload {
    value: u64,
    padding: [u8; 56],
}

impl ChecksummedPayload {
    fn new(value: u64) -> Self {
        let padding = std::array::from_fn(|i| (value as u8).wrapping_add(i as u8));
        Self { value, padding }
    }
}

impl Drop for ChecksummedPayload {
    fn drop(&mut self) {
        for (i, &byte) in self.padding.iter().enumerate() {
            assert_eq!(
                byte,
                (self.value as u8).wrapping_add(i as u8),
                "checksum mismatch at byte {i} of payload {}",
                self.value
            );
        }
    }
}

fn soak_typed<P: SlabPool>(table: &'static SizeClassTable<P>) {
    assert_eq!(size_of::<ChecksummedPayload>(), 64);

    let total_allocated = AtomicUsize::new(0);

    thread::scope(|scope| {
        for thread_index in 0..THREADS {
            let total_allocated = &total_allocated;
            scope.spawn(move || {
                for i in 0..ITERATIONS_PER_THREAD {
                    let value = (thread_index * ITERATIONS_PER_THREAD + i) as u64;

                    let payload = PoolBox::new_in(table, ChecksummedPayload::new(value))
                        .expect("the system allocator is not exhausted");
                    assert_eq!(payload.value, value);

                    total_allocated.fetch_add(1, Ordering::Relaxed);
                    // Dropping verifies the checksum and recycles the slot.
                }
            });
        }
    });

    assert_eq!(
        total_allocated.load(Ordering::Relaxed),
        THREADS * ITERATIONS_PER_THREAD
    );
}

#[test]
fn locking_table_survives_concurrent_churn() {
    soak_typed::<MutexSlabPool>(locking_table());
}

#[test]
fn lock_free_table_survives_concurrent_churn() {
    soak_typed::<LockFreeSlabPool>(lock_free_table());
}

#[test]
fn raw_path_round_trips_under_contention() {
    let table = lock_free_table();

    thread::scope(|scope| {
        for thread_index in 0..THREADS {
            scope.spawn(move || {
                for i in 0..ITERATIONS_PER_THREAD {
                    let stamp = (thread_index * ITERATIONS_PER_THREAD + i) as u64;

                    let address = table
                        .acquire(40)
                        .expect("the system allocator is not exhausted");

                    // SAFETY: a freshly acquired 40-byte slot, released once.
                    unsafe {
                        address.cast::<u64>().write(stamp);
                        assert_eq!(address.cast::<u64>().read(), stamp);
                        table.release(address, 40);
                    }
                }
            });
        }
    });
}

/// Releasing `n` slots and re-acquiring `n` must hand back exactly the same
/// addresses on a quiescent pool: nothing leaks onto a free list twice and
/// nothing caller-owned stays on one.
#[test]
fn released_slots_are_conserved() {
    fn check<P: SlabPool>() {
        let table = SizeClassTable::<P>::new();
        let count = if cfg!(miri) { 50 } else { 1_000 };

        let mut acquired: Vec<*mut u8> = (0..count)
            .map(|_| table.acquire(72).expect("the system allocator is not exhausted"))
            .collect();

        for &address in &acquired {
            // SAFETY: acquired from this table just above, released once.
            unsafe { table.release(address, 72) };
        }

        let mut reacquired: Vec<*mut u8> = (0..count).map(|_| table.acquire(72).unwrap()).collect();

        acquired.sort_unstable();
        reacquired.sort_unstable();
        assert_eq!(acquired, reacquired);
    }

    check::<MutexSlabPool>();
    check::<LockFreeSlabPool>();
}
