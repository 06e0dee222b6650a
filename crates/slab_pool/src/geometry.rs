use std::alloc::Layout;
use std::mem;

use crate::region::SlotLink;

/// Slot and block measurements for one pool.
///
/// All carving arithmetic is derived from this: the rounded slot size, the
/// number of link-sized steps between consecutive slots, and the size of the
/// blocks requested from the system allocator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotGeometry {
    /// Bytes per slot. Always a non-zero multiple of the link word.
    slot_size: usize,

    /// `slot_size` expressed in link-sized units; the bump pointer advances
    /// by this many links per slot.
    slot_advance: usize,

    /// Bytes requested per block from the system allocator.
    block_size: usize,
}

impl SlotGeometry {
    /// Derives the geometry for the requested slot size.
    ///
    /// The slot size is rounded up to a multiple of the link word so that a
    /// free slot can always hold its free-list link; a request of zero is
    /// treated as a request for one link word.
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "the rounded slot size is a non-zero link multiple, so the division is exact"
    )]
    pub(crate) fn new(slot_size: usize, block_size: usize) -> Self {
        let link = mem::size_of::<SlotLink>();

        let slot_size = if slot_size == 0 {
            link
        } else {
            slot_size
                .checked_next_multiple_of(link)
                .expect("slot size rounding overflows usize - no real slot size gets near this")
        };

        Self {
            slot_size,
            slot_advance: slot_size / link,
            block_size,
        }
    }

    pub(crate) fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub(crate) fn slot_advance(&self) -> usize {
        self.slot_advance
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    /// Layout of one block as requested from the system allocator.
    ///
    /// Blocks are link-aligned; slot alignment beyond that is produced by
    /// padding the block body, not by over-aligning the block itself.
    pub(crate) fn block_layout(&self) -> Layout {
        Layout::from_size_align(self.block_size, mem::align_of::<SlotLink>())
            .expect("block size and link alignment always form a valid layout")
    }

    /// Padding that aligns `body_addr` up to the next multiple of the slot
    /// size. Zero when the address is already aligned.
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "slot_size is non-zero and the outer modulo keeps every term below it"
    )]
    pub(crate) fn body_padding(&self, body_addr: usize) -> usize {
        (self.slot_size - body_addr % self.slot_size) % self.slot_size
    }
}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use std::mem;

    use super::*;

    const LINK: usize = mem::size_of::<SlotLink>();

    #[test]
    fn zero_slot_size_becomes_one_link() {
        let geometry = SlotGeometry::new(0, 4096);

        assert_eq!(geometry.slot_size(), LINK);
        assert_eq!(geometry.slot_advance(), 1);
    }

    #[test]
    fn small_sizes_round_up_to_link_multiple() {
        let geometry = SlotGeometry::new(1, 4096);
        assert_eq!(geometry.slot_size(), LINK);

        let geometry = SlotGeometry::new(LINK + 1, 4096);
        assert_eq!(geometry.slot_size(), 2 * LINK);
        assert_eq!(geometry.slot_advance(), 2);
    }

    #[test]
    fn link_multiples_are_unchanged() {
        for multiple in 1..=8 {
            let geometry = SlotGeometry::new(multiple * LINK, 4096);

            assert_eq!(geometry.slot_size(), multiple * LINK);
            assert_eq!(geometry.slot_advance(), multiple);
        }
    }

    #[test]
    fn body_padding_aligns_to_slot_size() {
        let geometry = SlotGeometry::new(24, 4096);

        for body_addr in [0, 8, 24, 25, 47, 48, 4096] {
            let padded = body_addr + geometry.body_padding(body_addr);
            assert_eq!(padded % geometry.slot_size(), 0);
            assert!(padded - body_addr < geometry.slot_size());
        }
    }

    #[test]
    fn block_layout_matches_block_size() {
        let geometry = SlotGeometry::new(64, 4096);
        let layout = geometry.block_layout();

        assert_eq!(layout.size(), 4096);
        assert_eq!(layout.align(), mem::align_of::<SlotLink>());
    }
}
