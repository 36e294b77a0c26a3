//! Process identity tokens.
//!
//! Allocator bookkeeping belongs to the process that built it. A forked
//! child inherits a copy of the parent's indices, which it must not trust,
//! so every allocator operation compares the current token with the one
//! recorded at construction and starts over on a mismatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the token the allocator compares on every call.
pub trait ProcessIdentity: Send + Sync {
    /// Current identity token.
    fn current(&self) -> u64;
}

impl<T: ProcessIdentity + ?Sized> ProcessIdentity for Arc<T> {
    fn current(&self) -> u64 {
        (**self).current()
    }
}

/// The OS process id. Changes in a forked child.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessId;

impl ProcessIdentity for ProcessId {
    fn current(&self) -> u64 {
        u64::from(std::process::id())
    }
}

/// A token bumped by the host whenever inherited state must be dropped.
#[derive(Debug, Default)]
pub struct GenerationToken {
    generation: AtomicU64,
}

impl GenerationToken {
    /// Create a token at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to the next generation; returns the new value.
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl ProcessIdentity for GenerationToken {
    fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_stable() {
        assert_eq!(ProcessId.current(), ProcessId.current());
        assert_eq!(ProcessId.current(), u64::from(std::process::id()));
    }

    #[test]
    fn test_generation_bump() {
        let token = Arc::new(GenerationToken::new());
        assert_eq!(token.current(), 0);
        assert_eq!(token.bump(), 1);
        assert_eq!(token.current(), 1);
    }
}
