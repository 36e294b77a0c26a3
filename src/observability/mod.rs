//! Observability: metrics for the allocator.
//!
//! Structured logs are emitted through `tracing` directly at the call
//! sites; this module holds the `metrics-rs` side.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `shmheap_arenas_created` | Counter | Arenas created |
//! | `shmheap_arena_bytes_created` | Counter | Bytes requested for new arenas |
//! | `shmheap_arenas_discarded` | Counter | Fully free arenas returned to the OS |
//! | `shmheap_allocations` | Counter | Blocks allocated |
//! | `shmheap_allocated_bytes_total` | Counter | Bytes handed out (rounded) |
//! | `shmheap_frees` | Counter | Blocks freed |
//! | `shmheap_deferred_frees` | Counter | Frees queued behind a busy lock |
//! | `shmheap_allocated_bytes` | Gauge | Bytes currently allocated |
//! | `shmheap_arena_bytes` | Gauge | Bytes held in arenas |
//!
//! No recorder is installed by the library; install an exporter in the
//! host application to collect these.

mod metrics;

pub use self::metrics::{
    init_metrics, record_allocation, record_arena_created, record_arena_discarded,
    record_deferred_free, record_free, record_occupancy,
};
