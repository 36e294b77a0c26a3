//! The segment allocator.
//!
//! Hands out [`Block`]s from a set of arenas, best fit by length, and
//! coalesces adjacent free blocks on free. A miss creates a new arena
//! through the [`ArenaFactory`]; a large arena that becomes entirely free
//! is closed again.
//!
//! # Locking
//!
//! All bookkeeping sits behind one mutex. `allocate` waits for it. `free`
//! only tries it: if another call holds the lock, the block goes onto a
//! FIFO of deferred frees that the next lock holder applies before doing
//! anything else. The deferred queue has its own mutex, which is never held
//! while waiting for the state lock.

use super::defaults::round_up;
use super::identity::{ProcessId, ProcessIdentity};
use super::index::FreeIndex;
use super::{Block, HeapConfig, HeapStats};
use crate::arena::{Arena, ArenaFactory, ArenaId, ShmArenaFactory};
use crate::error::{Error, Result};
use crate::observability as obs;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, error, trace, warn};

/// Bookkeeping guarded by the allocator lock.
#[derive(Debug)]
struct HeapState {
    /// Identity token the state belongs to.
    token: u64,
    /// Minimum size of the next arena.
    arena_size: usize,
    arenas: BTreeMap<ArenaId, Arc<Arena>>,
    arena_bytes: usize,
    free: FreeIndex,
    /// `(start, end)` of every allocated block, per arena.
    allocated: HashMap<ArenaId, HashSet<(usize, usize)>>,
    allocated_bytes: usize,
    live_blocks: usize,
    allocation_count: u64,
    free_count: u64,
    invalid_deferred: u64,
}

impl HeapState {
    fn new(token: u64, arena_size: usize) -> Self {
        Self {
            token,
            arena_size,
            arenas: BTreeMap::new(),
            arena_bytes: 0,
            free: FreeIndex::new(),
            allocated: HashMap::new(),
            allocated_bytes: 0,
            live_blocks: 0,
            allocation_count: 0,
            free_count: 0,
            invalid_deferred: 0,
        }
    }
}

/// Best-fit allocator over shared memory arenas.
///
/// # Example
///
/// ```rust
/// use shmheap::heap::{HeapConfig, SegmentAllocator};
///
/// let heap = SegmentAllocator::new(HeapConfig::small()).unwrap();
///
/// let block = heap.allocate(100).unwrap();
/// assert_eq!((block.start, block.end), (0, 104));
///
/// heap.free(block).unwrap();
/// assert!(heap.free(block).is_err()); // double free
/// ```
pub struct SegmentAllocator {
    config: HeapConfig,
    factory: Box<dyn ArenaFactory>,
    identity: Box<dyn ProcessIdentity>,
    state: Mutex<HeapState>,
    pending: Mutex<VecDeque<Block>>,
}

impl SegmentAllocator {
    /// Create an allocator whose arenas come from a [`ShmArenaFactory`] on
    /// `config.backing`, reset whenever the process id changes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(config: HeapConfig) -> Result<Self> {
        let factory = ShmArenaFactory::new(config.backing.clone());
        Self::with_factory(config, factory)
    }

    /// Create an allocator with a custom arena factory.
    pub fn with_factory(config: HeapConfig, factory: impl ArenaFactory + 'static) -> Result<Self> {
        Self::with_identity(config, factory, ProcessId)
    }

    /// Create an allocator with a custom factory and identity source.
    pub fn with_identity(
        config: HeapConfig,
        factory: impl ArenaFactory + 'static,
        identity: impl ProcessIdentity + 'static,
    ) -> Result<Self> {
        config.validate()?;
        obs::init_metrics();

        let token = identity.current();
        let state = HeapState::new(token, config.initial_arena_size);
        Ok(Self {
            config,
            factory: Box::new(factory),
            identity: Box::new(identity),
            state: Mutex::new(state),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// The configuration this allocator was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocate at least `size` bytes.
    ///
    /// The returned block is `size` rounded up to the alignment (a zero
    /// size takes one alignment unit).
    ///
    /// # Errors
    ///
    /// - `SizeTooLarge` if the rounded size overflows.
    /// - `ResourceExhausted` if a new arena was needed and the OS refused.
    pub fn allocate(&self, size: usize) -> Result<Block> {
        self.allocate_in(size).map(|(block, _)| block)
    }

    pub(super) fn allocate_in(&self, size: usize) -> Result<(Block, Arc<Arena>)> {
        let rounded = self.rounded_size(size)?;

        let mut state = self.lock_state();
        self.check_identity(&mut state);
        self.drain_pending(&mut state);

        let found = match state.free.take_best_fit(rounded) {
            Some(block) => block,
            None => self.grow(&mut state, rounded)?,
        };

        let block = Block::new(found.arena, found.start, found.start + rounded);
        if found.end > block.end {
            state
                .free
                .insert(Block::new(found.arena, block.end, found.end));
        }
        state
            .allocated
            .entry(block.arena)
            .or_default()
            .insert((block.start, block.end));
        state.allocated_bytes += rounded;
        state.live_blocks += 1;
        state.allocation_count += 1;

        let arena = Arc::clone(&state.arenas[&block.arena]);
        trace!(%block, requested = size, "allocated");
        obs::record_allocation(rounded);
        obs::record_occupancy(state.allocated_bytes, state.arena_bytes);
        Ok((block, arena))
    }

    /// Return a block to the allocator.
    ///
    /// Never waits for the lock: if it is busy the free is queued and
    /// applied by the next call that takes the lock, and `Ok(())` is
    /// returned without validating the block.
    ///
    /// # Errors
    ///
    /// `InvalidFree` if the block is not currently allocated.
    pub fn free(&self, block: Block) -> Result<()> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.lock_pending().push_back(block);
                trace!(%block, "allocator busy, free deferred");
                obs::record_deferred_free();
                return Ok(());
            }
        };
        self.check_identity(&mut state);
        self.drain_pending(&mut state);
        self.free_locked(&mut state, block)
    }

    /// Apply all deferred frees now.
    ///
    /// Returns the number applied. Invalid deferred frees are dropped and
    /// counted in [`HeapStats::invalid_deferred_frees`].
    pub fn reclaim(&self) -> usize {
        let mut state = self.lock_state();
        self.check_identity(&mut state);
        self.drain_pending(&mut state)
    }

    /// Look up an arena owned by this allocator.
    pub fn arena(&self, id: ArenaId) -> Option<Arc<Arena>> {
        let mut state = self.lock_state();
        self.check_identity(&mut state);
        state.arenas.get(&id).cloned()
    }

    /// Ids of all arenas, ascending.
    pub fn arena_ids(&self) -> Vec<ArenaId> {
        let mut state = self.lock_state();
        self.check_identity(&mut state);
        state.arenas.keys().copied().collect()
    }

    /// Snapshot of the free blocks, sorted by arena then offset.
    pub fn free_blocks(&self) -> Vec<Block> {
        let mut state = self.lock_state();
        self.check_identity(&mut state);
        let mut blocks: Vec<Block> = state.free.iter().copied().collect();
        blocks.sort_unstable();
        blocks
    }

    /// Snapshot of the allocated blocks, sorted by arena then offset.
    pub fn allocated_blocks(&self) -> Vec<Block> {
        let mut state = self.lock_state();
        self.check_identity(&mut state);
        let mut blocks: Vec<Block> = state
            .allocated
            .iter()
            .flat_map(|(&arena, ranges)| {
                ranges
                    .iter()
                    .map(move |&(start, end)| Block::new(arena, start, end))
            })
            .collect();
        blocks.sort_unstable();
        blocks
    }

    /// Current statistics.
    pub fn stats(&self) -> HeapStats {
        let mut state = self.lock_state();
        self.check_identity(&mut state);
        let pending_frees = self.lock_pending().len();
        HeapStats {
            arena_count: state.arenas.len(),
            total_bytes: state.arena_bytes,
            allocated_bytes: state.allocated_bytes,
            free_bytes: state.free.total_bytes(),
            live_blocks: state.live_blocks,
            free_blocks: state.free.len(),
            allocation_count: state.allocation_count,
            free_count: state.free_count,
            pending_frees,
            invalid_deferred_frees: state.invalid_deferred,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<Block>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rounded_size(&self, size: usize) -> Result<usize> {
        let rounded = round_up(size.max(1), self.config.alignment)
            .ok_or(Error::SizeTooLarge { size })?;
        if rounded > isize::MAX as usize {
            return Err(Error::SizeTooLarge { size });
        }
        Ok(rounded)
    }

    /// Start over if the state was built under another identity.
    fn check_identity(&self, state: &mut HeapState) {
        let current = self.identity.current();
        if current == state.token {
            return;
        }

        warn!(
            previous = state.token,
            current,
            arenas = state.arenas.len(),
            live_blocks = state.live_blocks,
            "process identity changed, discarding allocator state"
        );
        // Inherited arenas are forgotten, not closed: the parent still
        // uses them.
        *state = HeapState::new(current, self.config.initial_arena_size);
        self.lock_pending().clear();
        debug!(token = current, "allocator reset");
    }

    /// Create an arena for a request of `rounded` bytes and return its
    /// whole range. The range is not put in the free index.
    fn grow(&self, state: &mut HeapState, rounded: usize) -> Result<Block> {
        let length = round_up(state.arena_size.max(rounded), self.config.page_size)
            .filter(|&length| length <= isize::MAX as usize)
            .ok_or(Error::SizeTooLarge { size: rounded })?;

        let arena = self.factory.create_arena(length)?;
        if arena.len() < rounded {
            let len = arena.len();
            self.factory.close_arena(&arena);
            return Err(Error::ResourceExhausted(format!(
                "factory returned {len} bytes for a request of {length}"
            )));
        }

        if state.arena_size < self.config.double_arena_size_until {
            state.arena_size = state.arena_size.saturating_mul(2);
        }

        let arena = Arc::new(arena);
        let whole = Block::new(arena.id(), 0, arena.len());
        debug!(
            arena_id = %arena.id(),
            size = arena.len(),
            backing = %arena.backing_kind(),
            next_arena_size = state.arena_size,
            "arena created"
        );
        obs::record_arena_created(arena.len());

        state.arena_bytes += arena.len();
        state.arenas.insert(arena.id(), arena);
        Ok(whole)
    }

    /// Apply deferred frees in FIFO order; returns how many succeeded.
    fn drain_pending(&self, state: &mut HeapState) -> usize {
        let mut applied = 0;
        loop {
            let Some(block) = self.lock_pending().pop_front() else {
                break;
            };
            match self.free_locked(state, block) {
                Ok(()) => applied += 1,
                Err(err) => {
                    state.invalid_deferred += 1;
                    error!(%block, error = %err, "dropping invalid deferred free");
                }
            }
        }
        applied
    }

    fn free_locked(&self, state: &mut HeapState, block: Block) -> Result<()> {
        let removed = state
            .allocated
            .get_mut(&block.arena)
            .is_some_and(|ranges| ranges.remove(&(block.start, block.end)));
        if !removed {
            return Err(Error::InvalidFree { block });
        }
        state.allocated_bytes -= block.len();
        state.live_blocks -= 1;
        state.free_count += 1;

        let mut merged = block;
        if let Some(prev) = state.free.ending_at(block.arena, block.start) {
            state.free.remove(&prev);
            merged.start = prev.start;
        }
        if let Some(next) = state.free.starting_at(block.arena, block.end) {
            state.free.remove(&next);
            merged.end = next.end;
        }
        state.free.insert(merged);
        trace!(%block, %merged, "freed");
        obs::record_free();

        let arena_empty = state
            .allocated
            .get(&block.arena)
            .is_none_or(HashSet::is_empty);
        if arena_empty {
            state.allocated.remove(&block.arena);
            self.maybe_discard(state, merged);
        }
        obs::record_occupancy(state.allocated_bytes, state.arena_bytes);
        Ok(())
    }

    /// Close the arena of `whole` if it is above the discard threshold.
    /// `whole` must be the arena's only (free) block.
    fn maybe_discard(&self, state: &mut HeapState, whole: Block) {
        let Some(arena) = state.arenas.get(&whole.arena) else {
            return;
        };
        if arena.len() <= self.config.discard_threshold {
            return;
        }
        debug_assert_eq!((whole.start, whole.end), (0, arena.len()));

        state.free.remove(&whole);
        if let Some(arena) = state.arenas.remove(&whole.arena) {
            state.arena_bytes -= arena.len();
            self.factory.close_arena(&arena);
            debug!(arena_id = %arena.id(), size = arena.len(), "empty arena discarded");
            obs::record_arena_discarded();
        }
    }
}

impl std::fmt::Debug for SegmentAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
