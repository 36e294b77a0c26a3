//! Integration tests for the segment allocator.
//!
//! These drive the public API only and check the layout through the
//! `free_blocks` / `allocated_blocks` snapshots.

use shmheap::arena::{Arena, ArenaFactory, ArenaId, Backing, ShmArenaFactory};
use shmheap::heap::{Block, GenerationToken, HeapConfig, SegmentAllocator};
use shmheap::Error;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn small_config() -> HeapConfig {
    HeapConfig::small().with_backing(Backing::Heap)
}

fn small_heap() -> SegmentAllocator {
    SegmentAllocator::new(small_config()).unwrap()
}

/// Every arena is exactly covered by its free and allocated blocks, and no
/// two free blocks touch.
fn assert_partition(heap: &SegmentAllocator) {
    let mut by_arena: BTreeMap<ArenaId, Vec<(Block, bool)>> = BTreeMap::new();
    for block in heap.free_blocks() {
        by_arena.entry(block.arena).or_default().push((block, true));
    }
    for block in heap.allocated_blocks() {
        by_arena.entry(block.arena).or_default().push((block, false));
    }

    let ids = heap.arena_ids();
    for id in &ids {
        assert!(by_arena.contains_key(id), "arena {id} has no blocks");
    }

    for (id, mut blocks) in by_arena {
        let arena = heap
            .arena(id)
            .unwrap_or_else(|| panic!("blocks reference unknown arena {id}"));
        blocks.sort_by_key(|(b, _)| b.start);

        let mut cursor = 0;
        let mut prev_free = false;
        for (block, is_free) in blocks {
            assert!(!block.is_empty(), "empty block {block}");
            assert_eq!(block.start, cursor, "gap or overlap at {block}");
            assert!(!(prev_free && is_free), "uncoalesced free blocks at {block}");
            cursor = block.end;
            prev_free = is_free;
        }
        assert_eq!(cursor, arena.len(), "arena {id} not fully covered");
    }
}

/// Factory that counts closes per arena.
#[derive(Default)]
struct CountingFactory {
    created: AtomicUsize,
    closed: AtomicUsize,
}

impl ArenaFactory for CountingFactory {
    fn create_arena(&self, min_size: usize) -> shmheap::Result<Arena> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arena::heap(min_size)
    }

    fn close_arena(&self, arena: &Arena) {
        assert!(arena.close(), "arena {} closed twice", arena.id());
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory that always fails, like an OS out of descriptors.
struct ExhaustedFactory;

impl ArenaFactory for ExhaustedFactory {
    fn create_arena(&self, _min_size: usize) -> shmheap::Result<Arena> {
        Err(Error::ResourceExhausted("memfd_create: EMFILE".into()))
    }
}

#[test]
fn test_end_to_end_scenario() {
    init_tracing();
    let heap = small_heap();

    let h1 = heap.allocate(100).unwrap();
    assert_eq!(heap.arena_ids().len(), 1);
    assert_eq!(heap.allocated_blocks(), vec![Block::new(h1.arena, 0, 104)]);
    assert_eq!(heap.free_blocks(), vec![Block::new(h1.arena, 104, 4096)]);

    heap.free(h1).unwrap();
    assert!(heap.allocated_blocks().is_empty());
    assert_eq!(heap.free_blocks(), vec![Block::new(h1.arena, 0, 4096)]);
    assert_eq!(heap.arena_ids(), vec![h1.arena]);
}

#[test]
fn test_end_to_end_scenario_discarding() {
    let factory = Arc::new(CountingFactory::default());
    let heap =
        SegmentAllocator::with_factory(small_config().with_discard_threshold(1024), Arc::clone(&factory))
            .unwrap();

    let h1 = heap.allocate(100).unwrap();
    heap.free(h1).unwrap();

    assert!(heap.arena_ids().is_empty());
    assert!(heap.free_blocks().is_empty());
    assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_round_trip_restores_free_list() {
    let heap = small_heap();
    let _keep = heap.allocate(40).unwrap();
    let _keep2 = heap.allocate(300).unwrap();
    let before = heap.free_blocks();

    for size in [0, 1, 8, 100, 1000, 3000] {
        let block = heap.allocate(size).unwrap();
        heap.free(block).unwrap();
        assert_eq!(heap.free_blocks(), before, "size {size}");
    }
}

#[test]
fn test_double_free_rejected() {
    let heap = small_heap();
    let block = heap.allocate(64).unwrap();
    heap.free(block).unwrap();
    assert!(matches!(heap.free(block), Err(Error::InvalidFree { block: b }) if b == block));
    assert_partition(&heap);
}

#[test]
fn test_coalesce_regardless_of_free_order() {
    let heap = small_heap();
    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(64).unwrap();
    let c = heap.allocate(64).unwrap();
    let guard = heap.allocate(8).unwrap();

    heap.free(a).unwrap();
    heap.free(c).unwrap();
    assert_eq!(heap.free_blocks().len(), 3);
    heap.free(b).unwrap();

    let free = heap.free_blocks();
    assert_eq!(free[0], Block::new(a.arena, a.start, c.end));
    assert_eq!(free.len(), 2);
    assert_eq!(heap.allocated_blocks(), vec![guard]);
    assert_partition(&heap);
}

#[test]
fn test_best_fit_picks_smallest_sufficient_block() {
    let heap = small_heap();
    let b16 = heap.allocate(16).unwrap();
    let _s1 = heap.allocate(8).unwrap();
    let b64 = heap.allocate(64).unwrap();
    let _s2 = heap.allocate(8).unwrap();
    let b128 = heap.allocate(128).unwrap();
    let _s3 = heap.allocate(8).unwrap();

    heap.free(b16).unwrap();
    heap.free(b64).unwrap();
    heap.free(b128).unwrap();

    let block = heap.allocate(50).unwrap();
    assert_eq!(block.len(), 56);
    assert_eq!(block.start, b64.start);

    let free = heap.free_blocks();
    assert!(free.contains(&Block::new(b64.arena, b64.start + 56, b64.end)));
    assert!(free.contains(&b16));
    assert!(free.contains(&b128));
    assert_partition(&heap);
}

#[test]
fn test_growth_adds_one_arena() {
    let heap = small_heap();
    let first = heap.allocate(4000).unwrap();
    let before = heap.free_blocks();
    assert_eq!(before, vec![Block::new(first.arena, 4000, 4096)]);

    let second = heap.allocate(200).unwrap();
    assert_ne!(second.arena, first.arena);
    assert_eq!(heap.arena_ids().len(), 2);

    let untouched: Vec<Block> = heap
        .free_blocks()
        .into_iter()
        .filter(|b| b.arena == first.arena)
        .collect();
    assert_eq!(untouched, before);
    assert!(heap.arena(second.arena).unwrap().len() >= 200);
    assert_partition(&heap);
}

#[test]
fn test_discard_only_above_threshold() {
    let factory = Arc::new(CountingFactory::default());
    let heap =
        SegmentAllocator::with_factory(small_config().with_discard_threshold(4096), Arc::clone(&factory))
            .unwrap();

    // 4096-byte arena: at the threshold, kept.
    let small = heap.allocate(100).unwrap();
    // Needs its own 8192-byte arena: above the threshold.
    let big = heap.allocate(5000).unwrap();
    assert_ne!(small.arena, big.arena);

    heap.free(small).unwrap();
    heap.free(big).unwrap();

    assert_eq!(heap.arena_ids(), vec![small.arena]);
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    assert_partition(&heap);
}

#[test]
fn test_resource_exhaustion_leaves_state_untouched() {
    let heap = SegmentAllocator::with_factory(small_config(), ExhaustedFactory).unwrap();
    assert!(matches!(heap.allocate(64), Err(Error::ResourceExhausted(_))));
    assert!(heap.arena_ids().is_empty());
    assert_eq!(heap.stats().allocation_count, 0);
}

#[test]
fn test_invalid_config_rejected() {
    let config = small_config().with_alignment(3);
    assert!(matches!(
        SegmentAllocator::new(config),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn test_concurrent_allocate_and_free() {
    init_tracing();
    const THREADS: usize = 8;
    const ROUNDS: usize = 500;

    let heap = Arc::new(small_heap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let heap = Arc::clone(&heap);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut live = Vec::new();
                for i in 0..ROUNDS {
                    live.push(heap.allocate((t * 31 + i * 7) % 700).unwrap());
                    if i % 3 == 0 {
                        let block = live.swap_remove(live.len() / 2);
                        heap.free(block).unwrap();
                    }
                }
                for block in live {
                    heap.free(block).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    heap.reclaim();
    let stats = heap.stats();
    assert_eq!(stats.pending_frees, 0);
    assert_eq!(stats.invalid_deferred_frees, 0);
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.allocated_bytes, 0);
    assert_eq!(stats.allocation_count, (THREADS * ROUNDS) as u64);
    assert_eq!(stats.free_count, stats.allocation_count);
    assert!(stats.is_consistent());
    assert_partition(&heap);
}

#[test]
fn test_concurrent_buffers() {
    const THREADS: usize = 4;

    let heap = Arc::new(small_heap());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let heap = Arc::clone(&heap);
            thread::spawn(move || {
                for i in 0..200 {
                    let mut buf = heap.allocate_buffer(16 + i % 64).unwrap();
                    buf.as_mut_slice().fill(t as u8);
                    assert!(buf.as_slice().iter().all(|&b| b == t as u8));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    heap.reclaim();
    assert_eq!(heap.stats().live_blocks, 0);
    assert_partition(&heap);
}

#[test]
fn test_generation_bump_starts_fresh() {
    let token = Arc::new(GenerationToken::new());
    let heap = SegmentAllocator::with_identity(
        small_config(),
        ShmArenaFactory::new(Backing::Heap),
        Arc::clone(&token),
    )
    .unwrap();

    let inherited = heap.allocate(512).unwrap();
    let _ = heap.allocate(512).unwrap();
    assert_eq!(heap.stats().live_blocks, 2);

    token.bump();
    let stats = heap.stats();
    assert_eq!(stats.arena_count, 0);
    assert_eq!(stats.live_blocks, 0);
    assert!(heap.free(inherited).is_err());

    let fresh = heap.allocate(512).unwrap();
    assert_eq!((fresh.start, fresh.end), (0, 512));
    assert_partition(&heap);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Allocate(usize),
        Free(usize),
        /// Allocate and immediately free.
        RoundTrip(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0usize..6000).prop_map(Op::Allocate),
            2 => any::<usize>().prop_map(Op::Free),
            2 => (0usize..6000).prop_map(Op::RoundTrip),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_partition_holds(ops in proptest::collection::vec(op(), 1..80)) {
            let heap = SegmentAllocator::new(
                small_config().with_discard_threshold(8192),
            ).unwrap();
            let mut live: Vec<Block> = Vec::new();

            for op in ops {
                match op {
                    Op::Allocate(size) => {
                        let block = heap.allocate(size).unwrap();
                        prop_assert_eq!(block.len() % 8, 0);
                        prop_assert!(block.len() >= size.max(1));
                        live.push(block);
                    }
                    Op::Free(pick) if !live.is_empty() => {
                        let block = live.swap_remove(pick % live.len());
                        heap.free(block).unwrap();
                    }
                    Op::Free(_) => {}
                    Op::RoundTrip(size) => {
                        let before = heap.free_blocks();
                        let rounded = size.max(1).div_ceil(8) * 8;
                        let fits = before.iter().any(|b| b.len() >= rounded);

                        let block = heap.allocate(size).unwrap();
                        heap.free(block).unwrap();
                        // A miss adds an arena, so only a hit restores the
                        // exact free list.
                        if fits {
                            prop_assert_eq!(heap.free_blocks(), before);
                        }
                    }
                }
                assert_partition(&heap);
            }

            let stats = heap.stats();
            prop_assert_eq!(stats.live_blocks, live.len());
            prop_assert!(stats.is_consistent());
        }
    }
}
