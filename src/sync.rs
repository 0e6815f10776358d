pub mod backoff;
pub mod priority;
pub mod scheduler;
pub mod steps;

pub use backoff::{RetryTimer, DEFAULT_RETRY_BASE, DEFAULT_RETRY_MAX, DEFAULT_RETRY_MULTIPLIER};
pub use priority::{PriorityFlag, PriorityGuard, PriorityReader};
pub use scheduler::{PassOutcome, ScheduledPass, UpdateScheduler};
pub use steps::{LiveSync, SyncError, SyncFuture, SyncStep};
