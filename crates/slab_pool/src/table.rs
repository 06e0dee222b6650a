use std::array;
use std::ptr::{self, NonNull};
use std::sync::LazyLock;

use crate::error::Result;
use crate::lockfree_pool::LockFreeSlabPool;
use crate::mutex_pool::MutexSlabPool;
use crate::oversized;
use crate::pool::SlabPool;
use crate::{MAX_SLOT_SIZE, SIZE_CLASS_COUNT, SLOT_BASE_SIZE};

/// The size class serving a request of `size` bytes, for in-range sizes.
#[allow(
    clippy::arithmetic_side_effects,
    reason = "callers stay within 1..=MAX_SLOT_SIZE, so the index math cannot underflow or overflow"
)]
const fn class_index(size: usize) -> usize {
    (size + SLOT_BASE_SIZE - 1) / SLOT_BASE_SIZE - 1
}

/// The slot size a request of `size` bytes is served from, for
/// `1..=`[`MAX_SLOT_SIZE`]: `size` rounded up to the next multiple of
/// [`SLOT_BASE_SIZE`]. Addresses returned for such requests are multiples of
/// this value.
#[must_use]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "the class index tops out at SIZE_CLASS_COUNT - 1, far from overflow"
)]
pub const fn slot_size_for(size: usize) -> usize {
    (class_index(size) + 1) * SLOT_BASE_SIZE
}

/// A fixed array of [`SIZE_CLASS_COUNT`] slab pools covering slot sizes
/// [`SLOT_BASE_SIZE`]`..=`[`MAX_SLOT_SIZE`] in [`SLOT_BASE_SIZE`] steps,
/// plus the dispatch logic that routes a request to the right pool - or
/// past the pools entirely for oversized requests.
///
/// Most callers want one of the two process-wide tables,
/// [`locking_table()`] or [`lock_free_table()`]; standalone tables exist so
/// a subsystem can keep its allocations out of the shared ones.
///
/// # Examples
///
/// ```
/// use slab_pool::{MutexSlabPool, SizeClassTable};
///
/// let table = SizeClassTable::<MutexSlabPool>::new();
///
/// let address = table.acquire(40).expect("the system allocator is not exhausted");
/// assert_eq!(address as usize % 40_usize.next_multiple_of(8), 0);
///
/// // SAFETY: acquired from this table with this size, released once.
/// unsafe { table.release(address, 40) };
/// ```
#[derive(Debug)]
pub struct SizeClassTable<P> {
    pools: [P; SIZE_CLASS_COUNT],
}

impl<P: SlabPool> SizeClassTable<P> {
    /// Creates a table with one pool per size class, each using the default
    /// block size.
    #[must_use]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "slot sizes top out at SIZE_CLASS_COUNT * SLOT_BASE_SIZE = MAX_SLOT_SIZE"
    )]
    pub fn new() -> Self {
        Self {
            pools: array::from_fn(|index| P::with_slot_size((index + 1) * SLOT_BASE_SIZE)),
        }
    }

    /// Acquires `size` bytes.
    ///
    /// A zero-size request returns a null address without touching any
    /// pool. Requests up to [`MAX_SLOT_SIZE`] are served by the matching
    /// size class and return an address that is a multiple of
    /// [`slot_size_for`]`(size)`; larger requests go straight to the system
    /// allocator with [`oversized alignment`][crate::OVERSIZED_ALIGN].
    ///
    /// # Errors
    ///
    /// Fails when the system allocator refuses the backing memory.
    #[expect(
        clippy::indexing_slicing,
        reason = "class_index is always < SIZE_CLASS_COUNT for in-range sizes"
    )]
    pub fn acquire(&self, size: usize) -> Result<*mut u8> {
        if size == 0 {
            return Ok(ptr::null_mut());
        }

        if size > MAX_SLOT_SIZE {
            return oversized::acquire(size).map(NonNull::as_ptr);
        }

        let pool = &self.pools[class_index(size)];
        pool.acquire().map(NonNull::as_ptr)
    }

    /// Releases an address previously acquired with `size`.
    ///
    /// A null address is a no-op.
    ///
    /// # Safety
    ///
    /// A non-null `address` must have come from [`acquire`][Self::acquire]
    /// on this same table, must not have been released since, and `size`
    /// must map to the same size class as the size passed to that acquire
    /// (any oversized request must be released with an oversized `size`).
    /// Nothing may touch the memory after this call.
    #[expect(
        clippy::indexing_slicing,
        reason = "class_index is always < SIZE_CLASS_COUNT for in-range sizes"
    )]
    pub unsafe fn release(&self, address: *mut u8, size: usize) {
        let Some(address) = NonNull::new(address) else {
            return;
        };

        if size > MAX_SLOT_SIZE {
            // SAFETY: per this method's contract the address came from the
            // oversized path with a same-class (oversized) size.
            unsafe { oversized::release(address, size) };
            return;
        }

        let pool = &self.pools[class_index(size)];

        // SAFETY: per this method's contract the slot came from this pool
        // and is not already on its free list.
        unsafe { pool.release(address) };
    }
}

impl<P: SlabPool> Default for SizeClassTable<P> {
    fn default() -> Self {
        Self::new()
    }
}

static LOCKING_TABLE: LazyLock<SizeClassTable<MutexSlabPool>> = LazyLock::new(SizeClassTable::new);

static LOCK_FREE_TABLE: LazyLock<SizeClassTable<LockFreeSlabPool>> =
    LazyLock::new(SizeClassTable::new);

/// The process-wide table of mutex-guarded pools.
///
/// The first caller materializes the table; concurrent first callers block
/// until that single initialization finishes. The table lives for the rest
/// of the process - its memory is reclaimed by process exit, like any other
/// process-lifetime static.
#[must_use]
pub fn locking_table() -> &'static SizeClassTable<MutexSlabPool> {
    &LOCKING_TABLE
}

/// The process-wide table of lock-free pools.
///
/// Initialization behaves exactly like [`locking_table()`]; the two tables
/// are independent and each is initialized at most once.
#[must_use]
pub fn lock_free_table() -> &'static SizeClassTable<LockFreeSlabPool> {
    &LOCK_FREE_TABLE
}

/// Explicit warmup: forces both process-wide tables into existence so that
/// no later acquire pays for initialization. Calling this is never required
/// - the first use of either table initializes it implicitly.
pub fn ensure_initialized() {
    LazyLock::force(&LOCKING_TABLE);
    LazyLock::force(&LOCK_FREE_TABLE);
}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn class_index_maps_request_sizes_to_classes() {
        assert_eq!(class_index(1), 0);
        assert_eq!(class_index(8), 0);
        assert_eq!(class_index(9), 1);
        assert_eq!(class_index(16), 1);
        assert_eq!(class_index(17), 2);
        assert_eq!(class_index(512), 63);
    }

    #[test]
    fn slot_size_for_rounds_up_to_base_multiples() {
        assert_eq!(slot_size_for(1), 8);
        assert_eq!(slot_size_for(8), 8);
        assert_eq!(slot_size_for(9), 16);
        assert_eq!(slot_size_for(505), 512);
        assert_eq!(slot_size_for(512), 512);
    }

    #[test]
    fn zero_size_acquire_returns_null() {
        let table = SizeClassTable::<MutexSlabPool>::new();

        assert!(table.acquire(0).unwrap().is_null());
    }

    #[test]
    fn null_release_is_a_no_op() {
        let table = SizeClassTable::<MutexSlabPool>::new();

        unsafe {
            table.release(std::ptr::null_mut(), 64);
            table.release(std::ptr::null_mut(), MAX_SLOT_SIZE + 1);
        }
    }

    #[test]
    fn every_in_range_size_returns_a_class_aligned_address() {
        let table = SizeClassTable::<LockFreeSlabPool>::new();

        for size in 1..=MAX_SLOT_SIZE {
            let address = table.acquire(size).unwrap();
            assert!(!address.is_null());
            assert_eq!(
                address as usize % slot_size_for(size),
                0,
                "size {size} returned a misaligned address"
            );
            unsafe { table.release(address, size) };
        }
    }

    #[test]
    fn same_class_sizes_share_a_pool() {
        let table = SizeClassTable::<MutexSlabPool>::new();

        // 9 and 16 both map to the 16-byte class, so a slot released under
        // one size is reachable under the other.
        let a = table.acquire(9).unwrap();
        unsafe { table.release(a, 16) };
        let b = table.acquire(16).unwrap();
        assert_eq!(b, a);

        unsafe { table.release(b, 9) };
    }

    #[test]
    fn oversized_requests_bypass_the_pools() {
        let table = SizeClassTable::<MutexSlabPool>::new();

        let size = MAX_SLOT_SIZE + 1;
        let address = table.acquire(size).unwrap();
        assert!(!address.is_null());

        // Not a multiple of any pool's slot address stride is fine; all
        // that is promised is the oversized alignment.
        assert_eq!(address as usize % crate::OVERSIZED_ALIGN, 0);

        unsafe {
            std::ptr::write_bytes(address, 0x7E, size);
            assert_eq!(address.read(), 0x7E);
            table.release(address, size);
        }
    }

    #[test]
    fn payload_round_trips_through_a_slot() {
        let table = SizeClassTable::<LockFreeSlabPool>::new();

        let payload: [u8; 24] = std::array::from_fn(|i| i as u8 ^ 0x55);

        let address = table.acquire(24).unwrap();
        unsafe {
            address.cast::<[u8; 24]>().write(payload);
            assert_eq!(address.cast::<[u8; 24]>().read(), payload);
            table.release(address, 24);
        }
    }

    #[test]
    fn process_tables_are_distinct_and_stable() {
        ensure_initialized();

        assert!(std::ptr::eq(locking_table(), locking_table()));
        assert!(std::ptr::eq(lock_free_table(), lock_free_table()));
    }

    #[test]
    fn concurrent_first_use_observes_one_ready_table() {
        // Local table behind the same lazy-init primitive the process-wide
        // tables use, so "first use" can actually be exercised by the test.
        let table: Arc<LazyLock<SizeClassTable<LockFreeSlabPool>>> =
            Arc::new(LazyLock::new(SizeClassTable::new));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let address = table.acquire(64).unwrap();
                    assert!(!address.is_null());
                    unsafe { table.release(address, 64) };
                    table.acquire(64).unwrap() as usize
                })
            })
            .collect();

        let addresses: HashSet<usize> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        // Eight acquires with no matching release: eight live slots, all
        // distinct, all from the single initialized table.
        assert_eq!(addresses.len(), 8);
    }
}
