//! RAII buffer handles.

use super::{Block, SegmentAllocator};
use crate::arena::{Arena, ArenaId};
use crate::error::{Error, Result};
use std::sync::Arc;

impl SegmentAllocator {
    /// Allocate `size` bytes wrapped in a [`BufferHandle`] that frees the
    /// block when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`allocate`](Self::allocate).
    pub fn allocate_buffer(self: &Arc<Self>, size: usize) -> Result<BufferHandle> {
        let (block, arena) = self.allocate_in(size)?;
        Ok(BufferHandle {
            block,
            len: size,
            arena,
            allocator: Arc::clone(self),
            released: false,
        })
    }
}

/// An allocated block that frees itself on drop.
///
/// The handle is the only owner of its byte range, so `as_mut_slice` can
/// hand out `&mut [u8]` safely. Releasing twice is a no-op.
///
/// # Example
///
/// ```rust
/// use shmheap::heap::{HeapConfig, SegmentAllocator};
/// use std::sync::Arc;
///
/// let heap = Arc::new(SegmentAllocator::new(HeapConfig::small()).unwrap());
///
/// let mut buf = heap.allocate_buffer(5).unwrap();
/// buf.as_mut_slice().copy_from_slice(b"hello");
/// assert_eq!(buf.as_slice(), b"hello");
/// assert_eq!(buf.capacity(), 8);
///
/// drop(buf);
/// assert_eq!(heap.stats().live_blocks, 0);
/// ```
pub struct BufferHandle {
    block: Block,
    len: usize,
    arena: Arc<Arena>,
    allocator: Arc<SegmentAllocator>,
    released: bool,
}

impl BufferHandle {
    /// The underlying block.
    #[inline]
    pub fn block(&self) -> Block {
        self.block
    }

    /// Requested size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the requested size zero?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Block length (the requested size rounded up to the alignment).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.block.len()
    }

    /// The arena holding the bytes.
    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    /// Has the block been returned to the allocator?
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Read view of the requested bytes. Empty once released.
    pub fn as_slice(&self) -> &[u8] {
        if self.released {
            return &[];
        }
        // SAFETY: the block is allocated to this handle alone and stays
        // allocated until `release`, which needs `&mut self`.
        let bytes = unsafe { self.arena.slice(self.block.start, self.block.start + self.len) };
        bytes.unwrap_or(&[])
    }

    /// Write view of the requested bytes. Empty once released.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.released {
            return &mut [];
        }
        // SAFETY: as in `as_slice`; `&mut self` makes the view exclusive.
        match unsafe { self.arena.slice_mut(self.block.start, self.block.start + self.len) } {
            Ok(bytes) => bytes,
            Err(_) => &mut [],
        }
    }

    /// Free the block. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Propagates `InvalidFree` from the allocator, e.g. after it reset on
    /// an identity change. The handle counts as released either way.
    pub fn release(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        self.allocator.free(self.block)
    }

    /// Coordinates of the requested bytes, for a process that maps the
    /// same arena.
    pub fn ipc_ref(&self) -> BlockRef {
        BlockRef {
            arena_id: self.block.arena,
            offset: self.block.start,
            len: self.len,
        }
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!(block = %self.block, error = %err, "failed to release buffer");
        }
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("block", &self.block)
            .field("len", &self.len)
            .field("released", &self.released)
            .finish()
    }
}

/// Serializable reference to bytes inside an arena.
///
/// The receiver resolves `arena_id` through its own table of arenas it
/// mapped from the sender's descriptors.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct BlockRef {
    /// Sender-side arena id.
    pub arena_id: ArenaId,
    /// Byte offset within the arena.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl BlockRef {
    /// Serialize with rkyv.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Deserialize bytes produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<8>::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read view of the referenced bytes in `arena`.
    ///
    /// # Safety
    ///
    /// `arena` must be the mapping of the referenced arena, and no one may
    /// write the range while the slice is alive.
    pub unsafe fn resolve<'a>(&self, arena: &'a Arena) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(self.len).ok_or(Error::OutOfBounds {
            start: self.offset,
            end: usize::MAX,
            len: arena.len(),
        })?;
        // SAFETY: forwarded to the caller.
        unsafe { arena.slice(self.offset, end) }
    }
}
