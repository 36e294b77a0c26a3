//! Backing segment trait and types.

use crate::error::{Error, Result};
use rustix::fd::AsFd;
use rustix::mm::{MapFlags, ProtFlags};
use std::ptr::NonNull;

/// Kind of OS resource backing an arena.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum BackingKind {
    /// Anonymous shared memory (`memfd_create` + `mmap`).
    Memfd = 0,
    /// Shared mapping of a temp file that was unlinked right after creation.
    TempFile = 1,
    /// Plain heap memory (single process only).
    Heap = 2,
}

impl BackingKind {
    /// Can an arena with this backing be mapped by another process?
    #[inline]
    pub fn supports_ipc(&self) -> bool {
        match self {
            BackingKind::Memfd => true,
            BackingKind::TempFile => true,
            BackingKind::Heap => false,
        }
    }
}

impl std::fmt::Display for BackingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackingKind::Memfd => write!(f, "memfd"),
            BackingKind::TempFile => write!(f, "tempfile"),
            BackingKind::Heap => write!(f, "heap"),
        }
    }
}

/// Handle for sharing an arena's memory with another process.
///
/// The fd should be sent via `SCM_RIGHTS` over a Unix socket; the receiver
/// rebuilds the arena with [`Arena::from_fd`](super::Arena::from_fd).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHandle {
    /// The raw file descriptor.
    pub fd: std::os::unix::io::RawFd,
    /// Size of the memory region.
    pub size: usize,
}

/// Trait for arena backing segments.
///
/// A segment is one contiguous, zero-initialised mapping that stays valid
/// until the segment is dropped.
///
/// # Safety
///
/// Implementations must ensure that:
/// - The pointer stays valid for `len()` bytes for the lifetime of the segment
/// - The memory may be accessed from any thread (Send + Sync)
pub trait MemorySegment: Send + Sync {
    /// Raw pointer to the start of the mapping.
    fn as_ptr(&self) -> *mut u8;

    /// Total size of the mapping in bytes.
    fn len(&self) -> usize;

    /// Returns true if the segment has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The kind of OS resource behind this segment.
    fn backing_kind(&self) -> BackingKind;

    /// IPC handle for mapping this segment in another process.
    ///
    /// Returns `None` if the segment cannot be shared.
    fn ipc_handle(&self) -> Option<IpcHandle>;
}

/// Map `size` bytes of `fd` read-write and shared.
///
/// # Safety
///
/// `fd` must refer to a memfd or regular file of at least `size` bytes.
pub(super) unsafe fn map_shared(fd: impl AsFd, size: usize) -> Result<NonNull<u8>> {
    // SAFETY: null hint lets the kernel choose the address; the fd covers
    // `size` bytes per caller contract.
    let ptr = unsafe {
        rustix::mm::mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
    }
    .map_err(|e| Error::exhausted("mmap", e))?;

    NonNull::new(ptr.cast::<u8>()).ok_or_else(|| Error::ResourceExhausted("mmap returned null".into()))
}
