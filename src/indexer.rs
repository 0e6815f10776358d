pub mod job;
pub mod steps;

pub use job::{IndexerJob, IndexerRun, IndexerRunState};
pub use steps::{IndexingError, IndexingFuture, IndexingStep, IndexingSteps};
