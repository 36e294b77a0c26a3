//! Allocator statistics.

/// Point-in-time view of an allocator's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Arenas currently owned.
    pub arena_count: usize,
    /// Sum of arena sizes.
    pub total_bytes: usize,
    /// Bytes in allocated blocks (after alignment rounding).
    pub allocated_bytes: usize,
    /// Bytes in free blocks.
    pub free_bytes: usize,
    /// Blocks currently allocated.
    pub live_blocks: usize,
    /// Free blocks currently indexed.
    pub free_blocks: usize,
    /// Successful allocations since construction or the last reset.
    pub allocation_count: u64,
    /// Applied frees since construction or the last reset.
    pub free_count: u64,
    /// Frees waiting in the deferred queue.
    pub pending_frees: usize,
    /// Deferred frees dropped because the block was not allocated.
    pub invalid_deferred_frees: u64,
}

impl HeapStats {
    /// Share of arena bytes currently allocated, in percent.
    pub fn utilization_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.allocated_bytes as f64 / self.total_bytes as f64) * 100.0
    }

    /// Do free and allocated bytes account for every arena byte?
    pub fn is_consistent(&self) -> bool {
        self.allocated_bytes + self.free_bytes == self.total_bytes
    }
}
