//! Process-wide slab allocation for small objects.
//!
//! This crate serves fixed-size allocation requests of up to
//! [`MAX_SLOT_SIZE`] bytes faster than the general-purpose allocator by
//! carving large blocks into fixed-size slots once and then recycling
//! released slots through per-size free lists. Requests are routed through a
//! [`SizeClassTable`]: [`SIZE_CLASS_COUNT`] pools at [`SLOT_BASE_SIZE`]-byte
//! spacing, with anything larger handed straight to the system allocator.
//!
//! Two pool flavors implement the same [`SlabPool`] abstraction:
//!
//! * [`MutexSlabPool`] - the free list is guarded by a lock.
//! * [`LockFreeSlabPool`] - the free list is a Treiber stack whose head is
//!   updated by generation-tagged compare-and-swap; only block carving takes
//!   a lock.
//!
//! Each flavor has a process-wide table ([`locking_table()`],
//! [`lock_free_table()`]), lazily initialized on first use. Pool memory is
//! never returned to the operating system before the owning pool is dropped;
//! the process-wide tables keep theirs until process exit.
//!
//! # Raw and typed access
//!
//! The tables speak raw addresses: [`SizeClassTable::acquire`] returns
//! uninitialized bytes and [`SizeClassTable::release`] takes them back,
//! with the caller responsible for passing the original request size (the
//! pools store no per-slot metadata). [`PoolBox`] wraps that contract into
//! an owning `Box`-like handle for a typed value.
//!
//! # Example
//!
//! ```
//! use slab_pool::{PoolBox, lock_free_table};
//!
//! // Raw: acquire, use, release - sizes under the caller's control.
//! let table = lock_free_table();
//! let address = table.acquire(24).expect("the system allocator is not exhausted");
//! // SAFETY: freshly acquired 24-byte slot, released exactly once below.
//! unsafe {
//!     address.cast::<[u8; 24]>().write([7; 24]);
//!     assert_eq!(address.cast::<[u8; 24]>().read(), [7; 24]);
//!     table.release(address, 24);
//! }
//!
//! // Typed: the handle tracks size and destruction for you.
//! let value = PoolBox::new([7_u8; 24]).expect("the system allocator is not exhausted");
//! assert_eq!(value[23], 7);
//! ```

mod error;
mod geometry;
mod lockfree_pool;
mod mutex_pool;
mod oversized;
mod pool;
mod region;
mod table;
mod typed;

pub use error::{AllocError, Result};
pub use lockfree_pool::LockFreeSlabPool;
pub use mutex_pool::MutexSlabPool;
pub use oversized::OVERSIZED_ALIGN;
pub use pool::{PoolBuilder, SlabPool};
pub use table::{
    SizeClassTable, ensure_initialized, lock_free_table, locking_table, slot_size_for,
};
pub use typed::PoolBox;

/// Spacing between consecutive size classes, in bytes. Also the smallest
/// slot size any table pool serves.
pub const SLOT_BASE_SIZE: usize = 8;

/// Number of size classes in a [`SizeClassTable`].
pub const SIZE_CLASS_COUNT: usize = 64;

/// Largest request served from the pools; anything bigger goes to the
/// system allocator.
#[allow(
    clippy::arithmetic_side_effects,
    reason = "compile-time product of two small constants"
)]
pub const MAX_SLOT_SIZE: usize = SLOT_BASE_SIZE * SIZE_CLASS_COUNT;

/// Bytes requested per block from the system allocator unless a pool is
/// built with an explicit block size.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
