use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Coarse "live work in progress, defer background jobs" signal.
///
/// Owned and asserted by the live synchronization subsystem; the indexer only reads it.
/// Assertions are counted so overlapping holders (initial catch-up plus a running
/// mempool sync, for example) compose: the flag clears once the last guard drops.
#[derive(Debug, Clone, Default)]
pub struct PriorityFlag {
    holders: Arc<AtomicUsize>,
}

impl PriorityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking, side-effect-free read.
    pub fn has_priority(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }

    /// Read-only view handed to observers such as the indexer.
    pub fn reader(&self) -> PriorityReader {
        PriorityReader {
            holders: self.holders.clone(),
        }
    }

    /// Asserts the flag until the returned guard is dropped.
    pub fn assert(&self) -> PriorityGuard {
        self.holders.fetch_add(1, Ordering::SeqCst);
        PriorityGuard {
            holders: self.holders.clone(),
        }
    }
}

/// Observes a [`PriorityFlag`] without being able to assert it.
#[derive(Debug, Clone)]
pub struct PriorityReader {
    holders: Arc<AtomicUsize>,
}

impl PriorityReader {
    pub fn has_priority(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

/// Keeps a [`PriorityFlag`] asserted while alive.
#[derive(Debug)]
pub struct PriorityGuard {
    holders: Arc<AtomicUsize>,
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}
