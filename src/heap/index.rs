//! Free-range index.
//!
//! Every free block is recorded three times:
//!
//! - by length, with a sorted list of the distinct lengths so the smallest
//!   block that fits a request is found by binary search (best fit). Each
//!   length bucket is ordered by insertion sequence, so the newest block
//!   pops first and any block is removed in O(log n);
//! - by `(arena, start)`, to find the free successor of a block being freed;
//! - by `(arena, end)`, to find the free predecessor.
//!
//! A block is either in all three maps or in none of them.

use super::Block;
use crate::arena::ArenaId;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub(crate) struct FreeIndex {
    /// Blocks of each length, keyed by insertion sequence.
    by_length: HashMap<usize, BTreeMap<u64, Block>>,
    /// Distinct keys of `by_length`, ascending.
    lengths: Vec<usize>,
    /// Block and its insertion sequence.
    by_start: HashMap<(ArenaId, usize), (Block, u64)>,
    by_end: HashMap<(ArenaId, usize), Block>,
    next_seq: u64,
    bytes: usize,
}

impl FreeIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a free block.
    pub(crate) fn insert(&mut self, block: Block) {
        debug_assert!(!block.is_empty(), "zero-length free block {block}");
        debug_assert!(!self.by_start.contains_key(&(block.arena, block.start)));
        debug_assert!(!self.by_end.contains_key(&(block.arena, block.end)));

        let len = block.len();
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.by_length.entry(len) {
            Entry::Occupied(e) => {
                e.into_mut().insert(seq, block);
            }
            Entry::Vacant(e) => {
                let pos = self.lengths.partition_point(|&l| l < len);
                self.lengths.insert(pos, len);
                e.insert(BTreeMap::from([(seq, block)]));
            }
        }
        self.by_start.insert((block.arena, block.start), (block, seq));
        self.by_end.insert((block.arena, block.end), block);
        self.bytes += len;
    }

    /// Remove a free block from all maps.
    ///
    /// Returns `false` (and changes nothing) if the block is not free.
    pub(crate) fn remove(&mut self, block: &Block) -> bool {
        let key = (block.arena, block.start);
        let seq = match self.by_start.get(&key) {
            Some((free, seq)) if free == block => *seq,
            _ => return false,
        };
        self.by_start.remove(&key);
        self.by_end.remove(&(block.arena, block.end));
        self.remove_from_length(block.len(), seq);
        self.bytes -= block.len();
        true
    }

    fn remove_from_length(&mut self, len: usize, seq: u64) {
        if let Some(blocks) = self.by_length.get_mut(&len) {
            blocks.remove(&seq);
            if blocks.is_empty() {
                self.by_length.remove(&len);
                if let Ok(pos) = self.lengths.binary_search(&len) {
                    self.lengths.remove(pos);
                }
            }
        }
    }

    /// Take the smallest free block of at least `size` bytes.
    ///
    /// Among blocks of the same length the most recently freed one wins.
    pub(crate) fn take_best_fit(&mut self, size: usize) -> Option<Block> {
        let pos = self.lengths.partition_point(|&l| l < size);
        let len = *self.lengths.get(pos)?;
        let blocks = self.by_length.get_mut(&len)?;
        let (_, block) = blocks.pop_last()?;
        if blocks.is_empty() {
            self.by_length.remove(&len);
            self.lengths.remove(pos);
        }
        self.by_start.remove(&(block.arena, block.start));
        self.by_end.remove(&(block.arena, block.end));
        self.bytes -= len;
        Some(block)
    }

    /// Free block in `arena` that ends exactly at `offset`.
    pub(crate) fn ending_at(&self, arena: ArenaId, offset: usize) -> Option<Block> {
        self.by_end.get(&(arena, offset)).copied()
    }

    /// Free block in `arena` that starts exactly at `offset`.
    pub(crate) fn starting_at(&self, arena: ArenaId, offset: usize) -> Option<Block> {
        self.by_start.get(&(arena, offset)).map(|&(block, _)| block)
    }

    /// Number of free blocks.
    pub(crate) fn len(&self) -> usize {
        self.by_start.len()
    }

    /// Total free bytes.
    pub(crate) fn total_bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Block> {
        self.by_start.values().map(|(block, _)| block)
    }

    /// Distinct free lengths, ascending.
    #[cfg(test)]
    pub(crate) fn lengths(&self) -> &[usize] {
        &self.lengths
    }
}
