//! Error types for shmheap.

use crate::arena::ArenaId;
use crate::heap::Block;
use thiserror::Error;

/// Result type alias using shmheap's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for shmheap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested size cannot be rounded to the allocator's alignment
    /// without overflowing.
    #[error("requested size {size} is too large")]
    SizeTooLarge {
        /// The size the caller asked for.
        size: usize,
    },

    /// The OS refused to provide a new arena (memory, descriptors or
    /// backing-file space exhausted).
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The block is not currently recorded as allocated.
    #[error("invalid free of {block}: block is not allocated")]
    InvalidFree {
        /// The block the caller tried to free.
        block: Block,
    },

    /// The arena has already been closed.
    #[error("arena {0} is closed")]
    ArenaClosed(ArenaId),

    /// Byte range lies outside the arena.
    #[error("range [{start}, {end}) out of bounds for arena of {len} bytes")]
    OutOfBounds {
        /// Range start.
        start: usize,
        /// Range end (exclusive).
        end: usize,
        /// Arena length.
        len: usize,
    },

    /// Allocator configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Descriptor (de)serialization failed (rkyv).
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Build a `ResourceExhausted` error from a failed OS call.
    pub(crate) fn exhausted(op: &str, err: impl std::fmt::Display) -> Self {
        Error::ResourceExhausted(format!("{op}: {err}"))
    }
}
