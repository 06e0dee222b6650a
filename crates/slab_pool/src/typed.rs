use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::MAX_SLOT_SIZE;
use crate::error::Result;
use crate::lockfree_pool::LockFreeSlabPool;
use crate::oversized::OVERSIZED_ALIGN;
use crate::pool::SlabPool;
use crate::table::{SizeClassTable, lock_free_table};

/// An owning handle to a `T` stored in pool memory.
///
/// Construction acquires `size_of::<T>()` bytes from a process-wide (or
/// caller-supplied) [`SizeClassTable`] and moves the value in; dropping the
/// handle runs `T`'s destructor in place and returns the slot to the same
/// table. In between it behaves like a `Box<T>`: dereference to use the
/// value.
///
/// Zero-sized types never touch the pools - the handle is free to create
/// and free to drop, and the destructor still runs exactly once.
///
/// # Alignment
///
/// Sizes up to [`MAX_SLOT_SIZE`] are served from slots whose addresses are
/// multiples of the rounded slot size, which every Rust type's alignment
/// divides (a type's size is always a multiple of its alignment, and the
/// rounding preserves that divisibility), so no check is needed. Larger
/// types fall back to the system allocator, which grants
/// [`OVERSIZED_ALIGN`][crate::OVERSIZED_ALIGN] - types over-aligned beyond
/// that cannot be pooled and construction panics.
///
/// # Examples
///
/// ```
/// use slab_pool::PoolBox;
///
/// let mut value = PoolBox::new(41_u64).expect("the system allocator is not exhausted");
/// *value += 1;
/// assert_eq!(*value, 42);
/// ```
pub struct PoolBox<T, P: SlabPool + 'static = LockFreeSlabPool> {
    /// The stored value. Dangling (never dereferenced storage, but a valid
    /// `T` address) for zero-sized `T`.
    ptr: NonNull<T>,

    /// The table the slot came from and returns to.
    table: &'static SizeClassTable<P>,
}

impl<T> PoolBox<T> {
    /// Moves `value` into the process-wide lock-free table.
    ///
    /// # Errors
    ///
    /// Fails when the system allocator refuses the backing memory.
    ///
    /// # Panics
    ///
    /// Panics if `T` is larger than [`MAX_SLOT_SIZE`] and aligned more
    /// strictly than [`OVERSIZED_ALIGN`][crate::OVERSIZED_ALIGN].
    pub fn new(value: T) -> Result<Self> {
        Self::new_in(lock_free_table(), value)
    }
}

impl<T, P: SlabPool> PoolBox<T, P> {
    /// Moves `value` into a slot acquired from `table`.
    ///
    /// # Errors
    ///
    /// Fails when the system allocator refuses the backing memory.
    ///
    /// # Panics
    ///
    /// Panics if `T` is larger than [`MAX_SLOT_SIZE`] and aligned more
    /// strictly than [`OVERSIZED_ALIGN`][crate::OVERSIZED_ALIGN].
    pub fn new_in(table: &'static SizeClassTable<P>, value: T) -> Result<Self> {
        let size = mem::size_of::<T>();

        if size > MAX_SLOT_SIZE {
            assert!(
                mem::align_of::<T>() <= OVERSIZED_ALIGN,
                "cannot pool a {size}-byte value aligned to {} - oversized requests are served \
                 with {OVERSIZED_ALIGN}-byte alignment",
                mem::align_of::<T>(),
            );
        }

        let ptr = if size == 0 {
            NonNull::<T>::dangling()
        } else {
            let address = table.acquire(size)?;
            NonNull::new(address.cast::<T>())
                .expect("non-zero-size acquires never return a null address")
        };

        // SAFETY: the pointer is valid for writes of `T` - either a slot of
        // at least `size` bytes whose address the alignment argument above
        // covers, or a dangling-but-aligned address for a zero-sized `T`.
        unsafe { ptr.as_ptr().write(value) };

        Ok(Self { ptr, table })
    }

    /// A raw pointer to the stored value, valid for as long as the handle
    /// lives.
    #[must_use]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T, P: SlabPool> Deref for PoolBox<T, P> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the handle exclusively owns the value for its lifetime.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, P: SlabPool> DerefMut for PoolBox<T, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the handle exclusively owns the value for its lifetime.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T, P: SlabPool> Drop for PoolBox<T, P> {
    fn drop(&mut self) {
        // SAFETY: the value was written at construction and never moved out.
        unsafe { ptr::drop_in_place(self.ptr.as_ptr()) };

        if mem::size_of::<T>() != 0 {
            // SAFETY: the slot was acquired from this table with this size
            // at construction and this is its only release.
            unsafe {
                self.table
                    .release(self.ptr.as_ptr().cast::<u8>(), mem::size_of::<T>());
            }
        }
    }
}

impl<T: fmt::Debug, P: SlabPool> fmt::Debug for PoolBox<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: fmt::Display, P: SlabPool> fmt::Display for PoolBox<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

// SAFETY: the handle owns its value like a `Box<T>`; the table reference is
// `Sync` (pools serialize internally), so mobility is down to `T` alone.
unsafe impl<T: Send, P: SlabPool> Send for PoolBox<T, P> {}
// SAFETY: shared access to the handle only exposes `&T`.
unsafe impl<T: Sync, P: SlabPool> Sync for PoolBox<T, P> {}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::table::locking_table;

    static LIVE: AtomicUsize = AtomicUsize::new(0);

    struct Counted {
        value: u32,
    }

    impl Counted {
        fn new(value: u32) -> Self {
            LIVE.fetch_add(1, Ordering::Relaxed);
            Self { value }
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            LIVE.fetch_sub(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn smoke_test() {
        let mut boxed = PoolBox::new(7_u64).unwrap();
        assert_eq!(*boxed, 7);

        *boxed = 9;
        assert_eq!(*boxed, 9);
    }

    #[test]
    fn construction_and_drop_are_balanced() {
        let rounds = if cfg!(miri) { 50 } else { 1_000 };

        let boxes: Vec<_> = (0..rounds)
            .map(|i| PoolBox::new(Counted::new(i)).unwrap())
            .collect();
        assert_eq!(LIVE.load(Ordering::Relaxed), rounds as usize);

        for (i, boxed) in boxes.iter().enumerate() {
            assert_eq!(boxed.value, i as u32);
        }

        drop(boxes);
        assert_eq!(LIVE.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn works_against_the_locking_table() {
        let boxed = PoolBox::new_in(locking_table(), [0xA5_u8; 48]).unwrap();
        assert!(boxed.iter().all(|&byte| byte == 0xA5));
    }

    #[test]
    fn over_aligned_values_stay_aligned() {
        #[repr(align(32))]
        struct Aligned {
            bytes: [u8; 32],
        }

        for _ in 0..if cfg!(miri) { 20 } else { 1_000 } {
            let boxed = PoolBox::new(Aligned { bytes: [1; 32] }).unwrap();
            assert_eq!(boxed.as_ptr() as usize % 32, 0);
            assert_eq!(boxed.bytes[31], 1);
        }
    }

    #[test]
    fn oversized_values_use_the_fallback_path() {
        let boxed = PoolBox::new([0xC3_u8; 2048]).unwrap();
        assert_eq!(boxed.as_ptr() as usize % OVERSIZED_ALIGN, 0);
        assert!(boxed.iter().all(|&byte| byte == 0xC3));
    }

    #[test]
    fn zero_sized_values_still_run_their_destructor() {
        static MARKER_DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Marker;

        impl Drop for Marker {
            fn drop(&mut self) {
                MARKER_DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let boxed = PoolBox::new(Marker).unwrap();
        assert_eq!(MARKER_DROPS.load(Ordering::Relaxed), 0);

        drop(boxed);
        assert_eq!(MARKER_DROPS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn handles_move_between_threads() {
        let boxed = PoolBox::new(String::from("crossing")).unwrap();

        let returned = thread::spawn(move || {
            assert_eq!(*boxed, "crossing");
            boxed
        })
        .join()
        .unwrap();

        assert_eq!(*returned, "crossing");
    }
}
