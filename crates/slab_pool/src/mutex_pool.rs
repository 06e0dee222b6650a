use std::ptr::{self, NonNull};
use std::sync::Mutex;

use crate::error::Result;
use crate::geometry::SlotGeometry;
use crate::pool::SlabPool;
use crate::region::{BlockChain, SlotLink};

/// A single-size-class slab pool whose free list is guarded by a mutex.
///
/// Two independent locks serialize the pool: one around the free list, one
/// around block acquisition. An acquire first tries the free list (maximizing
/// slot reuse), and only when it is empty takes the block lock to bump-carve
/// from the active block. The free-list lock is never held while the block
/// lock is taken, so a release never waits behind a carve.
///
/// # Examples
///
/// ```
/// use slab_pool::{MutexSlabPool, SlabPool};
///
/// let pool = MutexSlabPool::with_slot_size(64);
///
/// let slot = pool.acquire().expect("the system allocator is not exhausted");
/// // SAFETY: the slot came from this pool and is released exactly once.
/// unsafe { pool.release(slot) };
/// ```
#[derive(Debug)]
pub struct MutexSlabPool {
    /// Head of the released-slot stack, or null when empty.
    free_list: Mutex<*mut SlotLink>,

    /// Block chain and bump region; the block-acquisition lock.
    blocks: Mutex<BlockChain>,

    slot_size: usize,
}

impl MutexSlabPool {
    fn pop_free(&self) -> Option<NonNull<u8>> {
        let mut head = self
            .free_list
            .lock()
            .expect("a free-list operation panicked while holding the lock");

        let slot = *head;
        if slot.is_null() {
            return None;
        }

        // SAFETY: every slot on the free list is live pool memory whose
        // link word was written when the slot was pushed.
        *head = unsafe { (*slot).next };

        Some(NonNull::new(slot.cast::<u8>()).expect("the free-list head was checked for null"))
    }
}

impl SlabPool for MutexSlabPool {
    fn with_config(slot_size: usize, block_size: usize) -> Self {
        let geometry = SlotGeometry::new(slot_size, block_size);

        Self {
            free_list: Mutex::new(ptr::null_mut()),
            slot_size: geometry.slot_size(),
            blocks: Mutex::new(BlockChain::new(geometry)),
        }
    }

    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn acquire(&self) -> Result<NonNull<u8>> {
        if let Some(slot) = self.pop_free() {
            return Ok(slot);
        }

        self.blocks
            .lock()
            .expect("a block carve panicked while holding the lock")
            .bump()
    }

    unsafe fn release(&self, slot: NonNull<u8>) {
        let link = slot.as_ptr().cast::<SlotLink>();

        let mut head = self
            .free_list
            .lock()
            .expect("a free-list operation panicked while holding the lock");

        // SAFETY: per this method's contract the slot is ours, live and
        // unaliased, so its first word is free to become the list link.
        unsafe {
            (*link).next = *head;
        }
        *head = link;
    }
}

// SAFETY: the raw pointers are to pool-owned memory and every access to them
// happens under one of the two mutexes; nothing is thread-affine.
unsafe impl Send for MutexSlabPool {}
// SAFETY: see above - shared access is serialized by the mutexes.
unsafe impl Sync for MutexSlabPool {}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn smoke_test() {
        let pool = MutexSlabPool::with_slot_size(64);

        let slot = pool.acquire().unwrap();
        unsafe {
            slot.as_ptr().cast::<u64>().write(0x1234_5678_9ABC_DEF0);
            assert_eq!(slot.as_ptr().cast::<u64>().read(), 0x1234_5678_9ABC_DEF0);
            pool.release(slot);
        }
    }

    #[test]
    fn released_slot_is_reused_first() {
        let pool = MutexSlabPool::with_slot_size(8);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);

        unsafe { pool.release(a) };

        let c = pool.acquire().unwrap();
        assert_eq!(c, a);
        assert_ne!(c, b);

        unsafe {
            pool.release(b);
            pool.release(c);
        }
    }

    #[test]
    fn free_list_is_consulted_before_the_bump_region() {
        let pool = MutexSlabPool::with_slot_size(32);

        // Prime the bump region so a fresh slot would be available either way.
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();

        unsafe {
            pool.release(second);
            pool.release(first);
        }

        // LIFO: the most recently released slot comes back first.
        assert_eq!(pool.acquire().unwrap(), first);
        assert_eq!(pool.acquire().unwrap(), second);
    }

    #[test]
    fn slots_stay_aligned_across_many_blocks() {
        let pool = MutexSlabPool::builder().slot_size(96).block_size(512).build();

        for _ in 0..100 {
            let slot = pool.acquire().unwrap();
            assert_eq!(slot.as_ptr() as usize % 96, 0);
        }
    }

    #[test]
    fn zero_slot_size_still_allocates() {
        let pool = MutexSlabPool::with_slot_size(0);
        assert_eq!(pool.slot_size(), size_of::<usize>());

        let slot = pool.acquire().unwrap();
        unsafe { pool.release(slot) };
    }

    #[test]
    fn geometry_that_fits_no_slot_errors() {
        let pool = MutexSlabPool::builder().slot_size(128).block_size(64).build();

        assert!(pool.acquire().is_err());
    }

    // `NonNull<u8>` is not `Send`, but a slot handle is just an address that
    // this test hands off to exactly one worker thread; wrapping it makes
    // that handoff explicit to the compiler.
    struct SendSlots(Vec<NonNull<u8>>);
    unsafe impl Send for SendSlots {}
    impl SendSlots {
        fn into_inner(self) -> Vec<NonNull<u8>> {
            self.0
        }
    }

    #[test]
    fn releases_from_many_threads_land_on_one_free_list() {
        let pool = Arc::new(MutexSlabPool::with_slot_size(64));

        let mut slots_per_thread = Vec::new();
        for _ in 0..4 {
            let slots: Vec<_> = (0..100).map(|_| pool.acquire().unwrap()).collect();
            slots_per_thread.push(SendSlots(slots));
        }

        let handles: Vec<_> = slots_per_thread
            .into_iter()
            .map(|slots| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for slot in slots.into_inner() {
                        unsafe { pool.release(slot) };
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // All 400 released slots are reachable again without a new carve
        // being required for them.
        let mut reacquired = Vec::new();
        for _ in 0..400 {
            reacquired.push(pool.acquire().unwrap());
        }
        reacquired.sort();
        reacquired.dedup();
        assert_eq!(reacquired.len(), 400);
    }
}
