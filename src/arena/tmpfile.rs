//! Shared segment backed by an unlinked temp file.
//!
//! This is the portable fallback to memfd: a file is created in a directory
//! with enough free space (preferring tmpfs such as `/dev/shm`), unlinked
//! immediately so nothing is left behind if the process dies, sized with
//! `ftruncate` and mapped shared. The open fd is what other processes map.

use super::segment::map_shared;
use super::{BackingKind, IpcHandle, MemorySegment};
use crate::error::{Error, Result};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Directories tried first when no explicit candidates are configured.
pub const DEFAULT_DIR_CANDIDATES: &[&str] = &["/dev/shm"];

/// A segment backed by a temp file that no longer has a name.
pub struct TempFileSegment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
    dir: PathBuf,
}

impl TempFileSegment {
    /// Create a segment of `size` bytes in the first candidate directory
    /// that has room for it, falling back to the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the file cannot be created, sized, or
    /// mapped.
    pub fn new<P: AsRef<Path>>(candidates: &[P], size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("segment size must be > 0".into()));
        }

        let dir = choose_dir(candidates, size);
        let file = tempfile::tempfile_in(&dir)
            .map_err(|e| Error::exhausted(&format!("tempfile in {}", dir.display()), e))?;
        let fd = OwnedFd::from(file);

        rustix::fs::ftruncate(&fd, size as u64).map_err(|e| Error::exhausted("ftruncate", e))?;

        // SAFETY: fd was just sized to `size`.
        let mut segment = unsafe { Self::map(fd, size)? };
        segment.dir = dir;
        Ok(segment)
    }

    /// Map a file-backed fd received from another process.
    ///
    /// # Safety
    ///
    /// `fd` must refer to a regular file of at least `size` bytes.
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
            dir: PathBuf::new(),
        })
    }

    /// Directory the file was created in (empty when rebuilt from an fd).
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Pick the first directory whose free space covers `size`.
fn choose_dir<P: AsRef<Path>>(candidates: &[P], size: usize) -> PathBuf {
    for candidate in candidates {
        let path = candidate.as_ref();
        match free_space(path) {
            Some(available) if available >= size as u64 => return path.to_path_buf(),
            Some(available) => {
                tracing::trace!(
                    dir = %path.display(),
                    available,
                    size,
                    "not enough space for arena"
                );
            }
            None => {}
        }
    }
    std::env::temp_dir()
}

fn free_space(path: &Path) -> Option<u64> {
    let st = rustix::fs::statvfs(path).ok()?;
    Some(st.f_bavail.saturating_mul(st.f_frsize))
}

impl MemorySegment for TempFileSegment {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn backing_kind(&self) -> BackingKind {
        BackingKind::TempFile
    }

    fn ipc_handle(&self) -> Option<IpcHandle> {
        Some(IpcHandle {
            fd: self.fd.as_raw_fd(),
            size: self.len,
        })
    }
}

impl Drop for TempFileSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the mapping created in `map`.
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

// SAFETY: shared mapping, kernel reference-counted fd, no thread-local state.
unsafe impl Send for TempFileSegment {}
unsafe impl Sync for TempFileSegment {}

impl AsFd for TempFileSegment {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
