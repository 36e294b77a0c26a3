//! Metrics collection using metrics-rs.

use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const ARENAS_CREATED: &str = "shmheap_arenas_created";
const ARENA_BYTES_CREATED: &str = "shmheap_arena_bytes_created";
const ARENAS_DISCARDED: &str = "shmheap_arenas_discarded";
const ALLOCATIONS: &str = "shmheap_allocations";
const ALLOCATED_BYTES_TOTAL: &str = "shmheap_allocated_bytes_total";
const FREES: &str = "shmheap_frees";
const DEFERRED_FREES: &str = "shmheap_deferred_frees";
const ALLOCATED_BYTES: &str = "shmheap_allocated_bytes";
const ARENA_BYTES: &str = "shmheap_arena_bytes";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(ARENAS_CREATED, Unit::Count, "Arenas created");
    metrics::describe_counter!(
        ARENA_BYTES_CREATED,
        Unit::Bytes,
        "Bytes requested from the OS for new arenas"
    );
    metrics::describe_counter!(
        ARENAS_DISCARDED,
        Unit::Count,
        "Fully free arenas returned to the OS"
    );
    metrics::describe_counter!(ALLOCATIONS, Unit::Count, "Blocks allocated");
    metrics::describe_counter!(
        ALLOCATED_BYTES_TOTAL,
        Unit::Bytes,
        "Bytes handed out, after alignment rounding"
    );
    metrics::describe_counter!(FREES, Unit::Count, "Blocks freed");
    metrics::describe_counter!(
        DEFERRED_FREES,
        Unit::Count,
        "Frees queued because the allocator lock was busy"
    );
    metrics::describe_gauge!(
        ALLOCATED_BYTES,
        Unit::Bytes,
        "Bytes currently allocated"
    );
    metrics::describe_gauge!(ARENA_BYTES, Unit::Bytes, "Bytes held in arenas");
}

/// Record a new arena.
#[inline]
pub fn record_arena_created(size: usize) {
    counter!(ARENAS_CREATED).increment(1);
    counter!(ARENA_BYTES_CREATED).increment(size as u64);
}

/// Record a discarded arena.
#[inline]
pub fn record_arena_discarded() {
    counter!(ARENAS_DISCARDED).increment(1);
}

/// Record a successful allocation.
#[inline]
pub fn record_allocation(bytes: usize) {
    counter!(ALLOCATIONS).increment(1);
    counter!(ALLOCATED_BYTES_TOTAL).increment(bytes as u64);
}

/// Record an applied free.
#[inline]
pub fn record_free() {
    counter!(FREES).increment(1);
}

/// Record a free pushed to the deferred queue.
#[inline]
pub fn record_deferred_free() {
    counter!(DEFERRED_FREES).increment(1);
}

/// Record current heap occupancy.
#[inline]
pub fn record_occupancy(allocated_bytes: usize, arena_bytes: usize) {
    gauge!(ALLOCATED_BYTES).set(allocated_bytes as f64);
    gauge!(ARENA_BYTES).set(arena_bytes as f64);
}
