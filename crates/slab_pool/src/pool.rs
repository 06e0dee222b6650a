use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::DEFAULT_BLOCK_SIZE;
use crate::error::Result;

/// A single-size-class slab pool.
///
/// Implementations carve large blocks from the system allocator into
/// fixed-size slots, hand slots out one at a time and recycle released slots
/// through a free list. The two provided implementations differ only in how
/// the free list is serialized: [`MutexSlabPool`][crate::MutexSlabPool]
/// guards it with a lock, [`LockFreeSlabPool`][crate::LockFreeSlabPool]
/// updates it with compare-and-swap.
pub trait SlabPool: Send + Sync + Sized {
    /// Creates a pool with the given slot size and block size.
    ///
    /// The slot size is rounded up to a multiple of one machine word (a
    /// zero request becomes one word); the block size is taken as-is and a
    /// block that cannot host a single rounded slot surfaces as an
    /// [`AllocError`][crate::AllocError] from the first [`acquire`][Self::acquire].
    fn with_config(slot_size: usize, block_size: usize) -> Self;

    /// Creates a pool with the given slot size and the default block size.
    fn with_slot_size(slot_size: usize) -> Self {
        Self::with_config(slot_size, DEFAULT_BLOCK_SIZE)
    }

    /// Returns a [`PoolBuilder`] for this pool flavor.
    fn builder() -> PoolBuilder<Self> {
        PoolBuilder::new()
    }

    /// The slot size of this pool, after rounding.
    fn slot_size(&self) -> usize;

    /// Hands out one uninitialized slot.
    ///
    /// The returned address is a multiple of [`slot_size`][Self::slot_size]
    /// and points at `slot_size` bytes that the caller owns outright until
    /// the slot is passed back to [`release`][Self::release].
    ///
    /// # Errors
    ///
    /// Fails when the system allocator refuses a new block, or when the
    /// configured block size cannot host a single slot.
    fn acquire(&self) -> Result<NonNull<u8>>;

    /// Returns a slot to the pool.
    ///
    /// # Safety
    ///
    /// `slot` must have been returned by a prior [`acquire`][Self::acquire]
    /// on this same pool and must not have been released since. Nothing may
    /// read or write the slot after this call until `acquire` hands it out
    /// again.
    unsafe fn release(&self, slot: NonNull<u8>);
}

/// Builder for either slab pool flavor.
///
/// # Examples
///
/// ```
/// use slab_pool::{LockFreeSlabPool, MutexSlabPool, SlabPool};
///
/// let locking = MutexSlabPool::builder().slot_size(64).build();
/// assert_eq!(locking.slot_size(), 64);
///
/// let lock_free = LockFreeSlabPool::builder()
///     .slot_size(48)
///     .block_size(16 * 1024)
///     .build();
/// assert_eq!(lock_free.slot_size(), 48);
/// ```
#[derive(Debug)]
#[must_use]
pub struct PoolBuilder<P> {
    slot_size: usize,
    block_size: usize,
    _flavor: PhantomData<P>,
}

impl<P: SlabPool> PoolBuilder<P> {
    pub(crate) fn new() -> Self {
        Self {
            slot_size: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            _flavor: PhantomData,
        }
    }

    /// Sets the slot size. Rounded up to a multiple of one machine word at
    /// build time; unset (or zero) means one word.
    pub fn slot_size(mut self, slot_size: usize) -> Self {
        self.slot_size = slot_size;
        self
    }

    /// Sets the size of the blocks requested from the system allocator.
    ///
    /// Defaults to [`DEFAULT_BLOCK_SIZE`]. A block size too small to host a
    /// single slot is not rejected here; it surfaces as an error from the
    /// first `acquire`.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Builds the pool.
    #[must_use]
    pub fn build(self) -> P {
        P::with_config(self.slot_size, self.block_size)
    }
}

impl<P: SlabPool> Default for PoolBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
