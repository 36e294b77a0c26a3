//! Arena: one OS-backed shared memory region with a one-shot teardown.
//!
//! An arena wraps a [`MemorySegment`] and gives it a process-unique
//! [`ArenaId`]. The allocator owns arenas through `Arc<Arena>` and calls
//! [`Arena::close`] exactly once, when the arena is empty and being
//! discarded. `close` unmaps the region and closes the backing fd right
//! away rather than waiting for the last `Arc` to go.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────┬──────────────┬──────────┬──────────────────────────┐
//! │ block A  │    free      │ block B  │           free           │
//! └──────────┴──────────────┴──────────┴──────────────────────────┘
//! ^                                                               ^
//! base                                                   base + len
//! ```
//!
//! The arena itself knows nothing about blocks; the layout is tracked by
//! the allocator.

use super::{BackingKind, HeapSegment, IpcHandle, MemfdSegment, MemorySegment, TempFileSegment};
use crate::error::{Error, Result};
use rustix::fd::OwnedFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Global counter for generating unique arena IDs.
static ARENA_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique arena identity.
///
/// IDs come from a monotonically increasing counter and are never reused
/// within a process.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct ArenaId(u64);

impl ArenaId {
    fn next() -> Self {
        ArenaId(ARENA_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id, e.g. one received from another process.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        ArenaId(raw)
    }

    /// The raw id value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ArenaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "arena#{}", self.0)
    }
}

/// A fixed-size contiguous region of shared memory.
pub struct Arena {
    id: ArenaId,
    base: NonNull<u8>,
    len: usize,
    backing: BackingKind,
    /// Backing resource; taken out and dropped by `close`.
    segment: Mutex<Option<Box<dyn MemorySegment>>>,
    closed: AtomicBool,
}

impl Arena {
    /// Wrap an existing segment as a new arena.
    pub fn new(segment: Box<dyn MemorySegment>) -> Result<Self> {
        if segment.is_empty() {
            return Err(Error::InvalidConfig("arena size must be > 0".into()));
        }
        let base = NonNull::new(segment.as_ptr())
            .ok_or_else(|| Error::ResourceExhausted("segment has null base".into()))?;

        Ok(Self {
            id: ArenaId::next(),
            base,
            len: segment.len(),
            backing: segment.backing_kind(),
            segment: Mutex::new(Some(segment)),
            closed: AtomicBool::new(false),
        })
    }

    /// Create an arena backed by an anonymous memfd.
    pub fn memfd(size: usize) -> Result<Self> {
        Self::new(Box::new(MemfdSegment::new("shmheap-arena", size)?))
    }

    /// Create an arena backed by an unlinked temp file in the first
    /// candidate directory with enough free space.
    pub fn temp_file<P: AsRef<Path>>(dirs: &[P], size: usize) -> Result<Self> {
        Self::new(Box::new(TempFileSegment::new(dirs, size)?))
    }

    /// Create a heap-backed (non-shareable) arena.
    pub fn heap(size: usize) -> Result<Self> {
        Self::new(Box::new(HeapSegment::new(size)?))
    }

    /// Map an arena received from another process.
    ///
    /// The rebuilt arena gets a fresh local [`ArenaId`]; the sender's id is
    /// still available from the descriptor it sent.
    ///
    /// # Safety
    ///
    /// `fd` must be the shared fd of an arena of exactly `descriptor.size`
    /// bytes with the described backing.
    pub unsafe fn from_fd(fd: OwnedFd, descriptor: &ArenaDescriptor) -> Result<Self> {
        let segment: Box<dyn MemorySegment> = match descriptor.backing {
            // SAFETY: forwarded from caller.
            BackingKind::Memfd => Box::new(unsafe { MemfdSegment::from_fd(fd, descriptor.size)? }),
            BackingKind::TempFile => {
                Box::new(unsafe { TempFileSegment::from_fd(fd, descriptor.size)? })
            }
            BackingKind::Heap => {
                return Err(Error::InvalidConfig(
                    "heap arenas cannot be shared across processes".into(),
                ));
            }
        };
        Self::new(segment)
    }

    /// Get the unique arena ID.
    #[inline]
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Total size of the arena in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the arena has zero length (never, once constructed).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Kind of OS resource behind this arena.
    #[inline]
    pub fn backing_kind(&self) -> BackingKind {
        self.backing
    }

    /// Has [`close`](Self::close) been called?
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// IPC handle for sharing this arena, if the backing supports it and the
    /// arena is still open.
    pub fn ipc_handle(&self) -> Option<IpcHandle> {
        let segment = self.segment.lock().unwrap_or_else(PoisonError::into_inner);
        segment.as_ref().and_then(|s| s.ipc_handle())
    }

    /// Serializable description of this arena, sent alongside its fd.
    pub fn descriptor(&self) -> ArenaDescriptor {
        ArenaDescriptor {
            arena_id: self.id,
            size: self.len,
            backing: self.backing,
        }
    }

    /// Release the backing OS resource.
    ///
    /// Returns `true` if this call closed the arena, `false` if it was
    /// already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::warn!(arena_id = %self.id, "arena closed twice");
            return false;
        }

        let segment = self
            .segment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(segment);

        tracing::debug!(arena_id = %self.id, size = self.len, backing = %self.backing, "arena closed");
        true
    }

    fn check_range(&self, start: usize, end: usize) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ArenaClosed(self.id));
        }
        if start > end || end > self.len {
            return Err(Error::OutOfBounds {
                start,
                end,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Raw pointer to `offset` within the arena.
    ///
    /// # Errors
    ///
    /// Fails if the arena is closed or `offset > len`.
    pub fn ptr_at(&self, offset: usize) -> Result<*mut u8> {
        self.check_range(offset, offset)?;
        // SAFETY: offset <= len was just checked.
        Ok(unsafe { self.base.as_ptr().add(offset) })
    }

    /// View `[start, end)` as a byte slice.
    ///
    /// # Safety
    ///
    /// The caller must ensure no one writes to the range while the slice is
    /// alive and that the arena is not closed before the slice is dropped.
    pub unsafe fn slice(&self, start: usize, end: usize) -> Result<&[u8]> {
        self.check_range(start, end)?;
        // SAFETY: range checked above; aliasing guaranteed by caller.
        Ok(unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(start), end - start) })
    }

    /// View `[start, end)` as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the range for the lifetime
    /// of the slice and must not close the arena before dropping it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, start: usize, end: usize) -> Result<&mut [u8]> {
        self.check_range(start, end)?;
        // SAFETY: range checked above; exclusivity guaranteed by caller.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr().add(start), end - start) })
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("backing", &self.backing)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// SAFETY: the mapping is shared memory; base/len never change and the
// segment is only taken under the mutex.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

/// Cross-process arena description (serializable).
///
/// Sent together with the arena fd so the receiver knows how to map it.
///
/// # Wire Format
///
/// rkyv archive of:
///
/// ```text
/// ┌──────────────────┬──────────────────┬─────────┐
/// │    arena_id      │       size       │ backing │
/// │     (8 bytes)    │  (usize archive) │ (1 byte)│
/// └──────────────────┴──────────────────┴─────────┘
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
pub struct ArenaDescriptor {
    /// Sender-side arena id.
    pub arena_id: ArenaId,
    /// Arena size in bytes.
    pub size: usize,
    /// Backing kind, which decides how the fd is mapped.
    pub backing: BackingKind,
}

impl ArenaDescriptor {
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
}
