//! Anonymous shared memory segment using Linux memfd.

use super::segment::map_shared;
use super::{BackingKind, IpcHandle, MemorySegment};
use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use std::ffi::CString;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

/// A segment backed by `memfd_create` (no filesystem visibility).
///
/// The kernel reclaims the memory once the mapping is gone and every
/// duplicate of the fd is closed, so handing the fd to another process keeps
/// the pages alive on that side even after this segment is dropped.
pub struct MemfdSegment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

impl MemfdSegment {
    /// Create a new zero-filled memfd segment of `size` bytes.
    ///
    /// `name` shows up in `/proc/<pid>/fd/` and is for debugging only.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if `memfd_create`, `ftruncate`, or `mmap`
    /// fails.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("segment size must be > 0".into()));
        }

        let cname = CString::new(name).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let fd = rustix::fs::memfd_create(&cname, rustix::fs::MemfdFlags::CLOEXEC)
            .map_err(|e| Error::exhausted("memfd_create", e))?;

        rustix::fs::ftruncate(&fd, size as u64).map_err(|e| Error::exhausted("ftruncate", e))?;

        // SAFETY: fd was just created and sized to `size`.
        unsafe { Self::map(fd, size) }
    }

    /// Map an existing memfd received from another process.
    ///
    /// # Safety
    ///
    /// `fd` must refer to a memfd of at least `size` bytes.
    pub unsafe fn from_fd(fd: OwnedFd, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("segment size must be > 0".into()));
        }
        // SAFETY: forwarded from caller.
        unsafe { Self::map(fd, size) }
    }

    unsafe fn map(fd: OwnedFd, size: usize) -> Result<Self> {
        // SAFETY: forwarded from caller.
        let ptr = unsafe { map_shared(&fd, size)? };
        Ok(Self {
            fd,
            ptr,
            len: size,
        })
    }
}

impl MemorySegment for MemfdSegment {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn backing_kind(&self) -> BackingKind {
        BackingKind::Memfd
    }

    fn ipc_handle(&self) -> Option<IpcHandle> {
        Some(IpcHandle {
            fd: self.fd.as_raw_fd(),
            size: self.len,
        })
    }
}

impl Drop for MemfdSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in `map`.
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
        // fd is closed when OwnedFd is dropped
    }
}

// SAFETY: the mapping is shared memory reachable from any thread and the fd
// is kernel reference-counted.
unsafe impl Send for MemfdSegment {}
unsafe impl Sync for MemfdSegment {}

impl AsFd for MemfdSegment {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
