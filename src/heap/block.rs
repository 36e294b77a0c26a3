//! Block coordinates.

use crate::arena::ArenaId;

/// A half-open byte range `[start, end)` inside one arena.
///
/// Blocks are plain coordinates: they do not own the bytes and do not free
/// anything on drop. See [`BufferHandle`](super::BufferHandle) for the RAII
/// form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block {
    /// Arena the range lives in.
    pub arena: ArenaId,
    /// First byte of the range.
    pub start: usize,
    /// One past the last byte of the range.
    pub end: usize,
}

impl Block {
    /// Create a block from its coordinates.
    #[inline]
    pub const fn new(arena: ArenaId, start: usize, end: usize) -> Self {
        Self { arena, start, end }
    }

    /// Length in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// True for a zero-length block (never handed out by the allocator).
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}, {})", self.arena, self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_len() {
        let block = Block::new(ArenaId::from_raw(1), 16, 64);
        assert_eq!(block.len(), 48);
        assert!(!block.is_empty());
        assert!(Block::new(ArenaId::from_raw(1), 8, 8).is_empty());
    }

    #[test]
    fn test_block_display() {
        let block = Block::new(ArenaId::from_raw(3), 0, 104);
        assert_eq!(block.to_string(), "arena#3[0, 104)");
    }
}
