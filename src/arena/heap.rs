//! Heap-backed segment.

use super::{BackingKind, IpcHandle, MemorySegment};
use crate::error::{Error, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// A segment backed by a zeroed heap allocation.
///
/// Useful for single-process use and for tests; it cannot be shared with
/// another process.
///
/// # Example
///
/// ```rust
/// use shmheap::arena::{HeapSegment, MemorySegment};
///
/// let segment = HeapSegment::new(1024).unwrap();
/// assert_eq!(segment.len(), 1024);
/// ```
pub struct HeapSegment {
    /// From `alloc_zeroed` with `layout`, freed in `Drop`.
    ptr: NonNull<u8>,
    layout: Layout,
}

impl HeapSegment {
    /// Create a new zero-initialized heap segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if size is 0 and `ResourceExhausted` if the
    /// allocator cannot provide `size` bytes.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("segment size must be > 0".into()));
        }

        let layout =
            Layout::array::<u8>(size).map_err(|e| Error::exhausted("heap layout", e))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::ResourceExhausted(format!("heap allocation of {size} bytes failed"))
        })?;

        Ok(Self { ptr, layout })
    }
}

impl MemorySegment for HeapSegment {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn backing_kind(&self) -> BackingKind {
        BackingKind::Heap
    }

    fn ipc_handle(&self) -> Option<IpcHandle> {
        None
    }
}

impl Drop for HeapSegment {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated in `new` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: the allocation is owned exclusively by this segment; concurrent
// access to disjoint ranges is coordinated by the allocator.
unsafe impl Send for HeapSegment {}
unsafe impl Sync for HeapSegment {}
