//! Arena factories: where new arenas come from and how they are torn down.

use super::Arena;
use crate::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of new arenas for the allocator.
///
/// The allocator calls `create_arena` when no free block fits a request and
/// `close_arena` exactly once per arena, when a large arena becomes entirely
/// free.
pub trait ArenaFactory: Send + Sync {
    /// Create an arena of at least `min_size` zero-initialised bytes.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if the OS cannot provide the memory.
    fn create_arena(&self, min_size: usize) -> Result<Arena>;

    /// Release an arena's OS resource.
    fn close_arena(&self, arena: &Arena) {
        arena.close();
    }
}

impl<F: ArenaFactory + ?Sized> ArenaFactory for Arc<F> {
    fn create_arena(&self, min_size: usize) -> Result<Arena> {
        (**self).create_arena(min_size)
    }

    fn close_arena(&self, arena: &Arena) {
        (**self).close_arena(arena)
    }
}

impl<F: ArenaFactory + ?Sized> ArenaFactory for Box<F> {
    fn create_arena(&self, min_size: usize) -> Result<Arena> {
        (**self).create_arena(min_size)
    }

    fn close_arena(&self, arena: &Arena) {
        (**self).close_arena(arena)
    }
}

/// Which OS resource backs new arenas.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Backing {
    /// Anonymous memfd (Linux).
    #[default]
    Memfd,
    /// Unlinked temp file in the first listed directory with enough free
    /// space, falling back to the system temp dir.
    TempFile {
        /// Candidate directories, tried in order.
        dirs: Vec<PathBuf>,
    },
    /// Heap memory; arenas cannot be shared with other processes.
    Heap,
}

impl Backing {
    /// Temp-file backing with the default candidates (`/dev/shm`).
    pub fn temp_file() -> Self {
        Backing::TempFile {
            dirs: super::tmpfile::DEFAULT_DIR_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// Default factory: creates arenas on the configured [`Backing`] and counts
/// how many were created and closed.
#[derive(Debug, Default)]
pub struct ShmArenaFactory {
    backing: Backing,
    created: AtomicU64,
    closed: AtomicU64,
}

impl ShmArenaFactory {
    /// Create a factory for the given backing.
    pub fn new(backing: Backing) -> Self {
        Self {
            backing,
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    /// Backing used for new arenas.
    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Number of arenas created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of arenas closed so far.
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

impl ArenaFactory for ShmArenaFactory {
    fn create_arena(&self, min_size: usize) -> Result<Arena> {
        let arena = match &self.backing {
            Backing::Memfd => Arena::memfd(min_size)?,
            Backing::TempFile { dirs } => Arena::temp_file(dirs, min_size)?,
            Backing::Heap => Arena::heap(min_size)?,
        };
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(arena)
    }

    fn close_arena(&self, arena: &Arena) {
        if arena.close() {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}
