use std::alloc::{alloc, dealloc};
use std::mem;
use std::ptr::{self, NonNull};

use crate::error::{AllocError, Result};
use crate::geometry::SlotGeometry;

/// A single machine-word forward link.
///
/// Two distinct things are threaded through values of this type: the first
/// word of every block links the blocks of a pool together for teardown, and
/// the first word of every free slot links the slots of a free list together.
/// A slot that has been handed to a caller is plain caller-owned memory and
/// the link word carries no meaning.
#[repr(transparent)]
#[derive(Debug)]
pub(crate) struct SlotLink {
    pub(crate) next: *mut SlotLink,
}

/// The block chain and bump region of one pool.
///
/// Owns every block the pool has ever carved and the bump pointer into the
/// newest one. Both pool flavors wrap this in a mutex: the chain and the bump
/// pointer are only ever mutated under the block-acquisition lock, never from
/// the free-list fast path.
#[derive(Debug)]
pub(crate) struct BlockChain {
    geometry: SlotGeometry,

    /// Head of the block chain, or null before the first carve. Walked only
    /// at teardown.
    first_block: *mut SlotLink,

    /// Next never-yet-handed-out slot in the active block, or null.
    cur_slot: *mut SlotLink,

    /// One past the last slot of the active block, or null. Equal to
    /// `cur_slot` exactly when the bump region is exhausted.
    end_slot: *mut SlotLink,
}

impl BlockChain {
    pub(crate) fn new(geometry: SlotGeometry) -> Self {
        Self {
            geometry,
            first_block: ptr::null_mut(),
            cur_slot: ptr::null_mut(),
            end_slot: ptr::null_mut(),
        }
    }

    pub(crate) fn geometry(&self) -> SlotGeometry {
        self.geometry
    }

    /// Hands out the next slot of the active block, carving a new block
    /// first if the bump region is exhausted.
    ///
    /// The returned address is a multiple of the slot size and points at
    /// `slot_size` bytes of uninitialized, caller-owned memory.
    pub(crate) fn bump(&mut self) -> Result<NonNull<u8>> {
        #[cfg(debug_assertions)]
        self.integrity_check();

        if self.cur_slot == self.end_slot {
            self.carve_new_block()?;
        }

        let slot = self.cur_slot;

        // SAFETY: `cur_slot != end_slot` after a successful carve, so the
        // slot and the position one advance past it are both inside the
        // active block's body.
        self.cur_slot = unsafe { self.cur_slot.add(self.geometry.slot_advance()) };

        Ok(NonNull::new(slot.cast::<u8>())
            .expect("the bump pointer is non-null whenever the bump region is non-exhausted"))
    }

    /// Requests one block from the system allocator, threads it onto the
    /// block chain and resets the bump region to its body.
    ///
    /// The block is only adopted once it is known to host at least one slot;
    /// a non-viable block is returned to the system allocator before the
    /// error surfaces, so nothing leaks and the chain never sees it.
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "the viability check bounds every term by the block size before it is used"
    )]
    fn carve_new_block(&mut self) -> Result<()> {
        let layout = self.geometry.block_layout();

        // SAFETY: `block_layout` always has non-zero size.
        let base = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(base) else {
            return Err(AllocError::SystemExhausted {
                bytes: self.geometry.block_size(),
            });
        };

        let slot_size = self.geometry.slot_size();

        // Viability math happens on plain addresses; no pointer into the
        // block body is formed until the block is known to contain it.
        let body_addr = (base.as_ptr() as usize) + mem::size_of::<SlotLink>();
        let padding = self.geometry.body_padding(body_addr);

        let lead = mem::size_of::<SlotLink>() + padding;
        let usable = self.geometry.block_size().saturating_sub(lead);

        if usable < slot_size {
            // SAFETY: `base` came from `alloc` with this exact layout and
            // has not been handed out anywhere.
            unsafe { dealloc(base.as_ptr(), layout) };

            return Err(AllocError::BlockTooSmall {
                block_size: self.geometry.block_size(),
                slot_size,
            });
        }

        let slot_count = usable / slot_size;

        // The block is viable; adopt it.
        let block = base.cast::<SlotLink>();

        // SAFETY: the first word of the block is ours to use as the chain
        // link; the block is live and link-aligned.
        unsafe {
            (*block.as_ptr()).next = self.first_block;
        }
        self.first_block = block.as_ptr();

        // SAFETY: `lead` and the full slot area were both verified to fit
        // inside the block just above.
        let first_slot = unsafe { base.as_ptr().add(lead).cast::<SlotLink>() };

        self.cur_slot = first_slot;

        // SAFETY: `slot_count * slot_advance` links span exactly the
        // carvable body, which fits inside the block.
        self.end_slot = unsafe { first_slot.add(slot_count * self.geometry.slot_advance()) };

        Ok(())
    }

    #[cfg_attr(test, mutants::skip)] // Diagnostic-only logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "diagnostic modulo on an already-validated bump region; slot_size is non-zero"
    )]
    fn integrity_check(&self) {
        assert_eq!(
            self.cur_slot.is_null(),
            self.end_slot.is_null(),
            "bump pointers must be both null (no block yet) or both live"
        );

        if self.cur_slot.is_null() {
            assert!(
                self.first_block.is_null(),
                "a chained block implies a live bump region"
            );
            return;
        }

        assert!(
            self.cur_slot <= self.end_slot,
            "bump pointer ran past the end of the active block"
        );

        let offset = self.cur_slot as usize;
        assert_eq!(
            offset % self.geometry.slot_size(),
            0,
            "bump pointer {offset:#x} is not a multiple of the slot size {}",
            self.geometry.slot_size()
        );
    }
}

impl Drop for BlockChain {
    fn drop(&mut self) {
        let layout = self.geometry.block_layout();

        let mut block = self.first_block;
        while !block.is_null() {
            // SAFETY: every chained block is live until this walk and its
            // link word was written at carve time.
            let next = unsafe { (*block).next };

            // SAFETY: the block was obtained from `alloc` with this exact
            // layout and nothing else ever frees it.
            unsafe { dealloc(block.cast::<u8>(), layout) };

            block = next;
        }
    }
}

// SAFETY: the chain is plain owned memory behind raw pointers; nothing about
// it is tied to a particular thread. Callers serialize access (both pool
// flavors keep it behind a mutex).
unsafe impl Send for BlockChain {}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use super::*;

    fn chain(slot_size: usize, block_size: usize) -> BlockChain {
        BlockChain::new(SlotGeometry::new(slot_size, block_size))
    }

    #[test]
    fn bump_yields_aligned_distinct_slots() {
        let mut chain = chain(24, 4096);
        let slot_size = chain.geometry().slot_size();

        let mut seen = Vec::new();
        for _ in 0..64 {
            let slot = chain.bump().unwrap();
            assert_eq!(slot.as_ptr() as usize % slot_size, 0);
            assert!(!seen.contains(&slot));
            seen.push(slot);
        }
    }

    #[test]
    fn consecutive_slots_are_one_slot_apart() {
        let mut chain = chain(64, 4096);

        let first = chain.bump().unwrap().as_ptr() as usize;
        let second = chain.bump().unwrap().as_ptr() as usize;

        assert_eq!(second - first, chain.geometry().slot_size());
    }

    #[test]
    fn exhausted_block_triggers_a_new_one() {
        // A 128-byte block with 48-byte slots: one link word, padding, then
        // at most two slots before the next carve.
        let mut chain = chain(48, 128);

        let mut slots = Vec::new();
        for _ in 0..10 {
            slots.push(chain.bump().unwrap());
        }

        // Every slot is still distinct and aligned even across block
        // boundaries.
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.as_ptr() as usize % 48, 0);
            assert!(!slots[..i].contains(slot));
        }
    }

    #[test]
    fn block_too_small_for_one_slot_fails() {
        let mut chain = chain(256, 64);

        let error = chain.bump().unwrap_err();
        assert_eq!(
            error,
            AllocError::BlockTooSmall {
                block_size: 64,
                slot_size: 256,
            }
        );
    }

    #[test]
    fn failed_carve_leaves_the_chain_reusable() {
        let mut chain = chain(256, 64);

        assert!(chain.bump().is_err());

        // The failed carve adopted nothing; failing again is just as clean.
        assert!(chain.bump().is_err());
    }

    #[test]
    fn slots_are_writable_for_their_full_size() {
        let mut chain = chain(40, 4096);

        let slot = chain.bump().unwrap();
        unsafe {
            ptr::write_bytes(slot.as_ptr(), 0xAB, 40);
            for offset in 0..40 {
                assert_eq!(slot.as_ptr().add(offset).read(), 0xAB);
            }
        }
    }
}
