use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use portable_atomic::AtomicU128;

use crate::error::Result;
use crate::geometry::SlotGeometry;
use crate::pool::SlabPool;
use crate::region::{BlockChain, SlotLink};

/// Free-list head paired with a generation counter, packed into one `u128`
/// for double-width compare-and-swap:
///
/// ```text
///   bits [127:64]  generation counter
///   bits [63:0]    slot address (full width, no stolen bits)
/// ```
///
/// The generation increments on every successful head CAS. A stack whose
/// head is a bare pointer is open to ABA: a popper reads head `A`, stalls,
/// another thread pops `A` and pushes it back with a different successor,
/// and the stalled popper's CAS then succeeds while installing the stale
/// successor. Slots re-enter this stack at the same address by design, so
/// the pairing with a monotonic counter is what makes the comparison able
/// to tell "still `A`" from "`A` again".
#[derive(Clone, Copy, Eq, PartialEq)]
#[repr(transparent)]
struct TaggedHead(u128);

impl TaggedHead {
    const EMPTY: Self = Self(0);

    fn new(slot: *mut SlotLink, generation: u64) -> Self {
        Self((u128::from(generation) << 64) | (slot as usize as u128))
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "the low 64 bits are the address by construction"
    )]
    fn slot(self) -> *mut SlotLink {
        (self.0 as u64) as usize as *mut SlotLink
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "the high 64 bits are the generation by construction"
    )]
    fn generation(self) -> u64 {
        (self.0 >> 64) as u64
    }

    fn bumped(self, slot: *mut SlotLink) -> Self {
        Self::new(slot, self.generation().wrapping_add(1))
    }
}

impl std::fmt::Debug for TaggedHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaggedHead({:p}, generation={})", self.slot(), self.generation())
    }
}

/// A single-size-class slab pool whose free list is a Treiber stack.
///
/// Releases and free-list hits never block: both are a small CAS loop on the
/// tagged head. Only the carve path - taken when the free list is empty and
/// the active block is exhausted - goes through a mutex, and the block chain
/// is mutated exclusively under that lock.
///
/// # Examples
///
/// ```
/// use slab_pool::{LockFreeSlabPool, SlabPool};
///
/// let pool = LockFreeSlabPool::with_slot_size(64);
///
/// let slot = pool.acquire().expect("the system allocator is not exhausted");
/// // SAFETY: the slot came from this pool and is released exactly once.
/// unsafe { pool.release(slot) };
/// ```
#[derive(Debug)]
pub struct LockFreeSlabPool {
    /// Tagged head of the released-slot stack; address zero when empty.
    free_list: AtomicU128,

    /// Block chain and bump region; the block-acquisition lock. Shared
    /// carving logic with the mutex flavor.
    blocks: Mutex<BlockChain>,

    slot_size: usize,
}

impl LockFreeSlabPool {
    /// Pops the most recently released slot, or `None` when the stack is
    /// empty and the caller should fall back to the bump region.
    fn pop_free(&self) -> Option<NonNull<u8>> {
        let mut observed = TaggedHead(self.free_list.load(Ordering::Acquire));

        loop {
            let head = observed.slot();
            if head.is_null() {
                return None;
            }

            // The link word is read through an atomic view because a racing
            // popper may already have handed this slot to a caller that is
            // overwriting it. A stale value read here is never trusted: the
            // tagged CAS below fails unless the head (and its generation)
            // are still exactly what we observed.
            //
            // SAFETY: `head` points into pool-owned block memory, which is
            // word-aligned and lives until the pool is dropped.
            let next = unsafe { (*head.cast::<AtomicUsize>()).load(Ordering::Relaxed) };

            let replacement = observed.bumped(next as *mut SlotLink);

            match self.free_list.compare_exchange_weak(
                observed.0,
                replacement.0,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(
                        NonNull::new(head.cast::<u8>())
                            .expect("the observed head was checked for null"),
                    );
                }
                Err(current) => observed = TaggedHead(current),
            }
        }
    }
}

impl SlabPool for LockFreeSlabPool {
    fn with_config(slot_size: usize, block_size: usize) -> Self {
        let geometry = SlotGeometry::new(slot_size, block_size);

        Self {
            free_list: AtomicU128::new(TaggedHead::EMPTY.0),
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

        let mut observed = TaggedHead(self.free_list.load(Ordering::Acquire));

        loop {
            // SAFETY: per this method's contract the slot is ours, live and
            // unaliased; its first word becomes the stack link. The atomic
            // view keeps racing link reads from poppers well-defined.
            unsafe {
                (*link.cast::<AtomicUsize>()).store(observed.slot() as usize, Ordering::Relaxed);
            }

            let replacement = observed.bumped(link);

            // Release on success publishes the link write (and everything
            // the caller wrote into the slot) to the popper that acquires
            // this head.
            match self.free_list.compare_exchange_weak(
                observed.0,
                replacement.0,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => observed = TaggedHead(current),
            }
        }
    }
}

// SAFETY: the raw pointers are to pool-owned memory; the free list is
// serialized by CAS on the tagged head and the block chain by its mutex.
unsafe impl Send for LockFreeSlabPool {}
// SAFETY: see above - shared access is serialized by CAS and the mutex.
unsafe impl Sync for LockFreeSlabPool {}

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
    fn tagged_head_round_trips_address_and_generation() {
        let slot = 0xDEAD_BEE8_usize as *mut SlotLink;

        let head = TaggedHead::new(slot, 42);
        assert_eq!(head.slot(), slot);
        assert_eq!(head.generation(), 42);

        let bumped = head.bumped(std::ptr::null_mut());
        assert!(bumped.slot().is_null());
        assert_eq!(bumped.generation(), 43);
    }

    #[test]
    fn generation_wraps_instead_of_overflowing() {
        let head = TaggedHead::new(std::ptr::null_mut(), u64::MAX);
        assert_eq!(head.bumped(std::ptr::null_mut()).generation(), 0);
    }

    #[test]
    fn smoke_test() {
        let pool = LockFreeSlabPool::with_slot_size(64);

        let slot = pool.acquire().unwrap();
        unsafe {
            slot.as_ptr().cast::<u64>().write(0x0FED_CBA9_8765_4321);
            assert_eq!(slot.as_ptr().cast::<u64>().read(), 0x0FED_CBA9_8765_4321);
            pool.release(slot);
        }
    }

    #[test]
    fn released_slot_is_reused_first() {
        let pool = LockFreeSlabPool::with_slot_size(8);

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
    fn slots_stay_aligned_across_many_blocks() {
        let pool = LockFreeSlabPool::builder()
            .slot_size(96)
            .block_size(512)
            .build();

        for _ in 0..100 {
            let slot = pool.acquire().unwrap();
            assert_eq!(slot.as_ptr() as usize % 96, 0);
        }
    }

    #[test]
    fn geometry_that_fits_no_slot_errors() {
        let pool = LockFreeSlabPool::builder()
            .slot_size(128)
            .block_size(64)
            .build();

        assert!(pool.acquire().is_err());
    }

    #[test]
    fn concurrent_acquire_release_hands_out_unique_slots() {
        let pool = Arc::new(LockFreeSlabPool::with_slot_size(16));

        let threads = 4;
        let per_thread: usize = if cfg!(miri) { 50 } else { 2_000 };

        let handles: Vec<_> = (0..threads)
            .map(|thread_index: usize| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let slot = pool.acquire().unwrap();
                        let stamp = (thread_index << 32) | i;
                        unsafe {
                            slot.as_ptr().cast::<usize>().write(stamp);
                            // A torn or shared slot would show another
                            // thread's stamp here.
                            assert_eq!(slot.as_ptr().cast::<usize>().read(), stamp);
                            pool.release(slot);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
