//! Shared buffers between two mappings of the same arena.
//!
//! The "consumer" here lives in the same process for simplicity, but gets
//! only what a real peer would: a dup'd fd, the encoded arena descriptor
//! and an encoded block reference.
//!
//! Run with: `RUST_LOG=shmheap=debug cargo run --example shared_buffers`

use rustix::fd::BorrowedFd;
use shmheap::arena::{Arena, ArenaDescriptor};
use shmheap::heap::BlockRef;
use shmheap::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let heap = Arc::new(SegmentAllocator::new(HeapConfig::default())?);

    // Producer: fill a few buffers.
    let mut buffers = Vec::new();
    for (i, msg) in ["first frame", "second frame", "third frame"].iter().enumerate() {
        let mut buf = heap.allocate_buffer(msg.len())?;
        buf.as_mut_slice().copy_from_slice(msg.as_bytes());
        println!("producer: buffer {i} at {}", buf.block());
        buffers.push(buf);
    }

    // Consumer: map each arena once from (fd, descriptor).
    let mut mapped: HashMap<ArenaId, Arena> = HashMap::new();
    for id in heap.arena_ids() {
        let Some(arena) = heap.arena(id) else { continue };
        let Some(handle) = arena.ipc_handle() else { continue };
        let wire = arena.descriptor().encode()?;

        let fd = rustix::io::fcntl_dupfd_cloexec(unsafe { BorrowedFd::borrow_raw(handle.fd) }, 0)?;
        let descriptor = ArenaDescriptor::decode(&wire)?;
        let remote = unsafe { Arena::from_fd(fd, &descriptor)? };
        mapped.insert(descriptor.arena_id, remote);
    }

    for buf in &buffers {
        let block_ref = BlockRef::decode(&buf.ipc_ref().encode()?)?;
        let Some(arena) = mapped.get(&block_ref.arena_id) else {
            continue;
        };
        let bytes = unsafe { block_ref.resolve(arena)? };
        println!("consumer: {:?}", String::from_utf8_lossy(bytes));
    }

    drop(buffers);
    let stats = heap.stats();
    println!(
        "\n{} arena(s), {} bytes, {} allocations, {} frees",
        stats.arena_count, stats.total_bytes, stats.allocation_count, stats.free_count
    );
    Ok(())
}
