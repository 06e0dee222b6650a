//! System-allocator fallback for requests larger than the largest size class.
//!
//! These requests never touch a pool: each one is an individual system
//! allocation, released back to the system allocator when the caller is done.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::error::{AllocError, Result};

/// Alignment granted to oversized requests.
///
/// Matches the strongest fundamental alignment the platform's general-purpose
/// allocator guarantees, so a caller placing any naturally aligned type in an
/// oversized allocation is covered.
pub const OVERSIZED_ALIGN: usize = 16;

fn layout_for(bytes: usize) -> Result<Layout> {
    Layout::from_size_align(bytes, OVERSIZED_ALIGN)
        .map_err(|_| AllocError::SystemExhausted { bytes })
}

pub(crate) fn acquire(bytes: usize) -> Result<NonNull<u8>> {
    let layout = layout_for(bytes)?;

    // SAFETY: oversized requests are strictly larger than the largest size
    // class, so the layout size is never zero.
    let ptr = unsafe { alloc(layout) };

    NonNull::new(ptr).ok_or(AllocError::SystemExhausted { bytes })
}

/// # Safety
///
/// `ptr` must have come from [`acquire`] with the same `bytes`, not yet
/// released.
pub(crate) unsafe fn release(ptr: NonNull<u8>, bytes: usize) {
    let layout = layout_for(bytes)
        .expect("the allocation exists, so its layout was already validated once");

    // SAFETY: per this function's contract the pointer came from `alloc`
    // with this exact layout.
    unsafe { dealloc(ptr.as_ptr(), layout) };
}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_large_allocation() {
        let bytes = 4 * 1024;

        let ptr = acquire(bytes).unwrap();
        assert_eq!(ptr.as_ptr() as usize % OVERSIZED_ALIGN, 0);

        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0x5A, bytes);
            assert_eq!(ptr.as_ptr().read(), 0x5A);
            release(ptr, bytes);
        }
    }

    #[test]
    fn absurd_sizes_error_instead_of_panicking() {
        assert!(acquire(usize::MAX - 4).is_err());
    }
}
