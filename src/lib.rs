//! # shmheap
//!
//! A segment allocator over shared memory arenas.
//!
//! Blocks are carved out of OS-backed regions (memfd, unlinked temp files,
//! or plain heap memory for single-process use) so that another process
//! mapping the same arena sees the same bytes. The allocator picks the
//! smallest free block that fits, coalesces neighbours on free, grows by
//! adding arenas and gives large empty arenas back to the OS.
//!
//! ## Features
//!
//! - **Best-fit allocation**: binary search over sorted free lengths
//! - **Coalescing**: O(1) neighbour lookup by start and end offset
//! - **Non-blocking free**: frees never wait for the lock; they are deferred
//! - **Fork-aware**: bookkeeping is dropped when the process identity changes
//! - **Cross-process**: arena fds plus rkyv descriptors for sharing
//!
//! ## Quick Start
//!
//! ```rust
//! use shmheap::prelude::*;
//! use std::sync::Arc;
//!
//! let heap = Arc::new(SegmentAllocator::new(HeapConfig::small())?);
//!
//! // Raw coordinates
//! let block = heap.allocate(100)?;
//! heap.free(block)?;
//!
//! // RAII buffer
//! let mut buf = heap.allocate_buffer(11)?;
//! buf.as_mut_slice().copy_from_slice(b"hello arena");
//! assert_eq!(buf.as_slice(), b"hello arena");
//! # Ok::<(), shmheap::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arena;
pub mod error;
pub mod heap;
pub mod observability;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::arena::{Arena, ArenaFactory, ArenaId, Backing, ShmArenaFactory};
    pub use crate::error::{Error, Result};
    pub use crate::heap::{Block, BufferHandle, HeapConfig, HeapStats, SegmentAllocator};
}

pub use error::{Error, Result};
