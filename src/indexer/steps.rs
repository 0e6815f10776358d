use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;

pub type IndexingFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Sub-steps of one indexing pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexingStep {
    BlockDatabase,
    ResetTimestamps,
    NetworkHashrate,
    PoolHashrate,
    PendingBlockRates,
}

impl IndexingStep {
    pub const ORDER: [IndexingStep; 5] = [
        IndexingStep::BlockDatabase,
        IndexingStep::ResetTimestamps,
        IndexingStep::NetworkHashrate,
        IndexingStep::PoolHashrate,
        IndexingStep::PendingBlockRates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingStep::BlockDatabase => "block_database",
            IndexingStep::ResetTimestamps => "reset_timestamps",
            IndexingStep::NetworkHashrate => "network_hashrate",
            IndexingStep::PoolHashrate => "pool_hashrate",
            IndexingStep::PendingBlockRates => "pending_block_rates",
        }
    }

    /// Advisory steps log their failure without aborting the pass.
    pub fn is_advisory(&self) -> bool {
        matches!(self, IndexingStep::ResetTimestamps)
    }
}

/// A failed indexing sub-step.
#[derive(Debug)]
pub struct IndexingError {
    step: IndexingStep,
    source: AnyError,
}

impl IndexingError {
    pub fn new(step: IndexingStep, source: AnyError) -> Self {
        Self { step, source }
    }

    pub fn step(&self) -> IndexingStep {
        self.step
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for IndexingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "indexing step {} failed: {}", self.step.as_str(), self.source)
    }
}

impl std::error::Error for IndexingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Historical indexing collaborator run by the indexer job. Every step is
/// independently fallible.
pub trait IndexingSteps: Send + Sync + 'static {
    fn generate_block_database(&self) -> IndexingFuture<'_>;

    fn reset_indexing_timestamps(&self) -> IndexingFuture<'_>;

    fn generate_network_hashrate_history(&self) -> IndexingFuture<'_>;

    fn generate_pool_hashrate_history(&self) -> IndexingFuture<'_>;

    fn save_pending_block_rates(&self) -> IndexingFuture<'_>;

    /// Dispatches to the method backing `step`.
    fn run_step(&self, step: IndexingStep) -> IndexingFuture<'_> {
        match step {
            IndexingStep::BlockDatabase => self.generate_block_database(),
            IndexingStep::ResetTimestamps => self.reset_indexing_timestamps(),
            IndexingStep::NetworkHashrate => self.generate_network_hashrate_history(),
            IndexingStep::PoolHashrate => self.generate_pool_hashrate_history(),
            IndexingStep::PendingBlockRates => self.save_pending_block_rates(),
        }
    }
}
