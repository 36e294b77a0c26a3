//! Allocator configuration.

use super::defaults;
use crate::arena::Backing;
use crate::error::{Error, Result};

/// Tuning and backing choices for a [`SegmentAllocator`](super::SegmentAllocator).
///
/// # Example
///
/// ```rust
/// use shmheap::arena::Backing;
/// use shmheap::heap::HeapConfig;
///
/// let config = HeapConfig::default()
///     .with_alignment(16)
///     .with_discard_threshold(1024 * 1024)
///     .with_backing(Backing::temp_file());
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Block lengths are rounded up to this (power of two).
    pub alignment: usize,
    /// Size of the first arena; later arenas double from here.
    pub initial_arena_size: usize,
    /// Growth size stops doubling once it reaches this.
    pub double_arena_size_until: usize,
    /// Fully free arenas strictly larger than this are closed.
    pub discard_threshold: usize,
    /// New arena lengths are rounded up to this (power of two).
    pub page_size: usize,
    /// OS resource behind new arenas.
    pub backing: Backing,
}

impl Default for HeapConfig {
    fn default() -> Self {
        let page_size = defaults::os_page_size();
        Self {
            alignment: defaults::ALIGNMENT,
            initial_arena_size: page_size,
            double_arena_size_until: defaults::DOUBLE_ARENA_SIZE_UNTIL,
            discard_threshold: defaults::DISCARD_THRESHOLD,
            page_size,
            backing: Backing::default(),
        }
    }
}

impl HeapConfig {
    /// Small fixed 4 KiB pages and arenas, independent of the host page size.
    pub fn small() -> Self {
        Self {
            initial_arena_size: defaults::SMALL_PAGE_SIZE,
            page_size: defaults::SMALL_PAGE_SIZE,
            ..Self::default()
        }
    }

    /// Fewer, bigger arenas for workloads with large buffers.
    pub fn large() -> Self {
        Self {
            initial_arena_size: defaults::LARGE_INITIAL_ARENA_SIZE,
            double_arena_size_until: defaults::LARGE_ARENA_CAP,
            discard_threshold: defaults::LARGE_ARENA_CAP,
            ..Self::default()
        }
    }

    /// Set the block alignment.
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the first arena's size.
    pub fn with_initial_arena_size(mut self, size: usize) -> Self {
        self.initial_arena_size = size;
        self
    }

    /// Set the size at which arena growth stops doubling.
    pub fn with_double_arena_size_until(mut self, size: usize) -> Self {
        self.double_arena_size_until = size;
        self
    }

    /// Set the discard threshold.
    pub fn with_discard_threshold(mut self, size: usize) -> Self {
        self.discard_threshold = size;
        self
    }

    /// Set the page granularity for new arenas.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the arena backing.
    pub fn with_backing(mut self, backing: Backing) -> Self {
        self.backing = backing;
        self
    }

    /// Check that the values are consistent.
    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        if !self.page_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "page size {} is not a power of two",
                self.page_size
            )));
        }
        if self.alignment > self.page_size {
            return Err(Error::InvalidConfig(format!(
                "alignment {} exceeds page size {}",
                self.alignment, self.page_size
            )));
        }
        if self.initial_arena_size == 0 {
            return Err(Error::InvalidConfig("initial arena size must be > 0".into()));
        }
        Ok(())
    }
}
