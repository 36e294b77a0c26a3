//! Segment allocator over arenas.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       SegmentAllocator                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  FreeIndex   │  │  allocated   │  │ deferred frees (FIFO) │  │
//! │  │ length/start │  │ per arena    │  │ own mutex             │  │
//! │  │ /end maps    │  │              │  │                       │  │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘  │
//! │                           │                                     │
//! │                    ArenaFactory (create / close)                │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!      Arena #1            Arena #2            Arena #3
//! ```
//!
//! - [`SegmentAllocator::allocate`] returns a [`Block`]: coordinates only.
//! - [`SegmentAllocator::allocate_buffer`] returns a [`BufferHandle`] that
//!   gives byte access and frees on drop.
//! - [`HeapConfig`] holds the tuning, [`defaults`] the stock values.

mod allocator;
mod block;
mod buffer;
mod config;
pub mod defaults;
mod identity;
mod index;
mod stats;

pub use allocator::SegmentAllocator;
pub use block::Block;
pub use buffer::{BlockRef, BufferHandle};
pub use config::HeapConfig;
pub use identity::{GenerationToken, ProcessId, ProcessIdentity};
pub use stats::HeapStats;
