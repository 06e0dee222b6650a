//! Typed pooled values via `PoolBox`.
#![allow(
    clippy::arithmetic_side_effects,
    reason = "example code favors directness over checked arithmetic"
)]

use slab_pool::{PoolBox, locking_table};

#[derive(Debug)]
struct Session {
    id: u64,
    tag: [u8; 16],
}

fn main() {
    // Values live in pool slots but handle like boxes.
    let mut session = PoolBox::new(Session {
        id: 1,
        tag: *b"interactive-user",
    }).expect("the system allocator is not exhausted");

    session.id = 42;
    println!("session {} ({})", session.id, String::from_utf8_lossy(&session.tag));

    // Dropping the handle runs the destructor and recycles the slot.
    drop(session);

    // Any table works; this one goes through the mutex-guarded pools.
    let counter = PoolBox::new_in(locking_table(), 0_u32)
        .expect("the system allocator is not exhausted");
    println!("counter starts at {counter}");

    // A burst of short-lived values churns through a handful of slots
    // instead of hitting the system allocator each time.
    for round in 0..3 {
        let values: Vec<_> = (0..4)
            .map(|i| PoolBox::new(round * 10 + i).expect("the system allocator is not exhausted"))
            .collect();
        let addresses: Vec<_> = values.iter().map(|v| v.as_ptr()).collect();
        println!("round {round}: {addresses:?}");
    }
}
