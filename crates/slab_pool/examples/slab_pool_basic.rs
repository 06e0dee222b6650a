//! Raw acquire/release against the process-wide tables.
#![allow(
    clippy::arithmetic_side_effects,
    reason = "example code favors directness over checked arithmetic"
)]

use slab_pool::{MAX_SLOT_SIZE, lock_free_table, locking_table, slot_size_for};

fn main() {
    let table = locking_table();

    // Small requests are served from size-classed slots; the address is a
    // multiple of the class slot size.
    let address = table
        .acquire(40)
        .expect("the system allocator is not exhausted");
    println!(
        "40-byte request -> {address:p} (slot size {})",
        slot_size_for(40)
    );
    assert_eq!(address as usize % slot_size_for(40), 0);

    // SAFETY: freshly acquired slot of 40 bytes, released exactly once.
    unsafe {
        address.cast::<[u8; 40]>().write([0xAB; 40]);
        table.release(address, 40);
    }

    // A released slot is the first thing the class hands out again.
    let reused = table.acquire(40).expect("the system allocator is not exhausted");
    println!("next 40-byte request -> {reused:p} (reused: {})", reused == address);
    // SAFETY: freshly acquired, released exactly once.
    unsafe { table.release(reused, 40) };

    // Oversized requests bypass the pools entirely.
    let big = table
        .acquire(MAX_SLOT_SIZE + 1)
        .expect("the system allocator is not exhausted");
    println!("{}-byte request -> {big:p} (system allocator)", MAX_SLOT_SIZE + 1);
    // SAFETY: acquired just above with this size, released exactly once.
    unsafe { table.release(big, MAX_SLOT_SIZE + 1) };

    // The lock-free table is a separate, independent set of pools with the
    // same interface.
    let lf = lock_free_table();
    let address = lf.acquire(40).expect("the system allocator is not exhausted");
    println!("lock-free 40-byte request -> {address:p}");
    // SAFETY: freshly acquired, released exactly once.
    unsafe { lf.release(address, 40) };
}
