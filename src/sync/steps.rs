use crate::sync::priority::PriorityReader;
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;

pub type SyncFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// The ordered steps of one update pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStep {
    NodeStatus,
    NewBlocks,
    Mempool,
}

impl SyncStep {
    /// Execution order inside a pass. Later steps rely on what earlier ones refreshed.
    pub const ORDER: [SyncStep; 3] = [SyncStep::NodeStatus, SyncStep::NewBlocks, SyncStep::Mempool];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::NodeStatus => "node_status",
            SyncStep::NewBlocks => "new_blocks",
            SyncStep::Mempool => "mempool",
        }
    }
}

/// A failed sync step. Always transient from the scheduler's point of view.
#[derive(Debug)]
pub struct SyncError {
    step: SyncStep,
    source: AnyError,
}

impl SyncError {
    pub fn new(step: SyncStep, source: AnyError) -> Self {
        Self { step, source }
    }

    pub fn step(&self) -> SyncStep {
        self.step
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} sync failed: {}", self.step.as_str(), self.source)
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Live synchronization collaborator driven by the update scheduler.
///
/// Each step is a unit from the scheduler's point of view: it may retry internally,
/// but it either completes or fails as a whole.
pub trait LiveSync: Send + Sync + 'static {
    /// Refreshes node status (chain, height, sync progress).
    fn sync_node_status(&self) -> SyncFuture<'_>;

    /// Pulls blocks connected since the previous pass.
    fn sync_new_blocks(&self) -> SyncFuture<'_>;

    /// Reconciles the local mempool view against the node.
    fn sync_mempool(&self) -> SyncFuture<'_>;

    /// Signal the indexer polls before starting background work. Only the
    /// collaborator itself can assert it.
    fn priority(&self) -> PriorityReader;
}
