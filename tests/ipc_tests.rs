//! Cross-mapping tests: a second mapping of an arena's fd, as another
//! process would build it, sees the bytes written through the allocator.

use rustix::fd::BorrowedFd;
use shmheap::arena::{Arena, ArenaDescriptor, Backing, BackingKind};
use shmheap::heap::{BlockRef, HeapConfig, SegmentAllocator};
use std::sync::Arc;

/// Duplicate the arena fd and map it again from its encoded descriptor.
fn remap(arena: &Arena) -> Arena {
    let handle = arena.ipc_handle().expect("arena is shareable");
    let wire = arena.descriptor().encode().unwrap();

    let dup = rustix::io::fcntl_dupfd_cloexec(unsafe { BorrowedFd::borrow_raw(handle.fd) }, 0)
        .unwrap();
    let descriptor = ArenaDescriptor::decode(&wire).unwrap();
    assert_eq!(descriptor.size, handle.size);
    let remote = unsafe { Arena::from_fd(dup, &descriptor) };
    remote.unwrap()
}

fn check_backing(backing: Backing, kind: BackingKind) {
    let heap = Arc::new(SegmentAllocator::new(HeapConfig::small().with_backing(backing)).unwrap());

    let mut buf = heap.allocate_buffer(13).unwrap();
    buf.as_mut_slice().copy_from_slice(b"hello, arenas");
    assert_eq!(buf.arena().backing_kind(), kind);

    let remote = remap(buf.arena());
    let block_ref = BlockRef::decode(&buf.ipc_ref().encode().unwrap()).unwrap();
    let seen = unsafe { block_ref.resolve(&remote) }.unwrap();
    assert_eq!(seen, b"hello, arenas");

    // Writes through the remote mapping are visible locally.
    let head = unsafe { remote.slice_mut(block_ref.offset, block_ref.offset + 5) };
    head.unwrap().copy_from_slice(b"HELLO");
    assert_eq!(&buf.as_slice()[..5], b"HELLO");
}

#[test]
fn test_memfd_arena_shared() {
    check_backing(Backing::Memfd, BackingKind::Memfd);
}

#[test]
fn test_temp_file_arena_shared() {
    check_backing(Backing::temp_file(), BackingKind::TempFile);
}

#[test]
fn test_heap_arena_not_shareable() {
    let arena = Arena::heap(4096).unwrap();
    assert!(arena.ipc_handle().is_none());
    assert!(!arena.backing_kind().supports_ipc());
}

#[test]
fn test_closed_arena_rejects_access() {
    let arena = Arena::memfd(4096).unwrap();
    let remote = remap(&arena);

    assert!(arena.close());
    assert!(arena.is_closed());
    assert!(unsafe { arena.slice(0, 8) }.is_err());
    // The other mapping is independent.
    assert!(unsafe { remote.slice(0, 8) }.is_ok());
}
