use thiserror::Error;

/// Errors that can occur while acquiring memory from a pool.
///
/// There is nothing transient here: every variant means the underlying
/// system allocator or the configured geometry cannot satisfy the request,
/// so retrying without changing something is pointless.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum AllocError {
    /// The system allocator refused to provide the requested memory.
    #[error("the system allocator refused an allocation of {bytes} bytes")]
    SystemExhausted {
        /// Size of the refused allocation, in bytes.
        bytes: usize,
    },

    /// The configured block size cannot host even a single slot once the
    /// block link word and alignment padding are accounted for.
    #[error(
        "a {block_size}-byte block cannot hold a single {slot_size}-byte slot after alignment"
    )]
    BlockTooSmall {
        /// Bytes requested per block from the system allocator.
        block_size: usize,
        /// Bytes per slot, after rounding.
        slot_size: usize,
    },
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type Result<T> = std::result::Result<T, AllocError>;
