//! Default allocator tuning values.
//!
//! These are policy, not protocol: any values keep the allocator correct.
//! They trade OS calls against memory held:
//!
//! - Arena size doubles on each growth until it reaches
//!   [`DOUBLE_ARENA_SIZE_UNTIL`], then stays put.
//! - Arenas larger than [`DISCARD_THRESHOLD`] are returned to the OS once
//!   fully free; smaller ones are kept for reuse.

/// Every block length is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Growth size stops doubling once it reaches this (4 MiB).
pub const DOUBLE_ARENA_SIZE_UNTIL: usize = 4 * 1024 * 1024;

/// Fully free arenas larger than this are closed (4 MiB).
pub const DISCARD_THRESHOLD: usize = 4 * 1024 * 1024;

/// Page size used by [`HeapConfig::small`](super::HeapConfig::small), fixed
/// so layouts are identical on every host.
pub const SMALL_PAGE_SIZE: usize = 4096;

/// Initial arena size for [`HeapConfig::large`](super::HeapConfig::large).
pub const LARGE_INITIAL_ARENA_SIZE: usize = 64 * 1024;

/// Doubling cap and discard threshold for
/// [`HeapConfig::large`](super::HeapConfig::large) (64 MiB).
pub const LARGE_ARENA_CAP: usize = 64 * 1024 * 1024;

/// The OS page size.
pub fn os_page_size() -> usize {
    rustix::param::page_size()
}

/// Round `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
pub const fn round_up(value: usize, align: usize) -> Option<usize> {
    let mask = align - 1;
    match value.checked_add(mask) {
        Some(v) => Some(v & !mask),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 8), Some(0));
        assert_eq!(round_up(1, 8), Some(8));
        assert_eq!(round_up(100, 8), Some(104));
        assert_eq!(round_up(104, 8), Some(104));
        assert_eq!(round_up(4097, 4096), Some(8192));
        assert_eq!(round_up(usize::MAX, 8), None);
    }

    #[test]
    fn test_os_page_size_is_power_of_two() {
        assert!(os_page_size().is_power_of_two());
    }
}
