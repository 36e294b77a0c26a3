//! Arenas: OS-backed shared memory regions.
//!
//! This module provides the leaf layer of the allocator: fixed-size
//! contiguous regions with a stable identity and a one-shot teardown.
//!
//! # Architecture
//!
//! - [`MemorySegment`]: Trait for backing resources (memfd, temp file, heap)
//! - [`Arena`]: A segment plus a process-unique [`ArenaId`] and `close()`
//! - [`ArenaFactory`]: Creates and closes arenas for the allocator
//!
//! # Example
//!
//! ```rust
//! use shmheap::arena::{ArenaFactory, Backing, ShmArenaFactory};
//!
//! let factory = ShmArenaFactory::new(Backing::Memfd);
//! let arena = factory.create_arena(64 * 1024).unwrap();
//!
//! // Share with another process: send the fd plus the descriptor.
//! let handle = arena.ipc_handle().unwrap();
//! let descriptor = arena.descriptor().encode().unwrap();
//! # let _ = (handle, descriptor);
//!
//! factory.close_arena(&arena);
//! ```

#[allow(clippy::module_inception)]
mod arena;
mod factory;
mod heap;
mod memfd;
mod segment;
mod tmpfile;

pub use arena::{Arena, ArenaDescriptor, ArenaId};
pub use factory::{ArenaFactory, Backing, ShmArenaFactory};
pub use heap::HeapSegment;
pub use memfd::MemfdSegment;
pub use segment::{BackingKind, IpcHandle, MemorySegment};
pub use tmpfile::{DEFAULT_DIR_CANDIDATES, TempFileSegment};
