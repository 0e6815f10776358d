pub mod events;
pub mod indexer;
pub mod node;
pub mod rpc;
pub mod runtime;
pub mod supervisor;
pub mod sync;

pub use events::{EventHub, EventKind, HubEvent, LiveFeed};
pub use indexer::{IndexerJob, IndexerRun, IndexerRunState, IndexingError, IndexingStep, IndexingSteps};
pub use node::{HistoryStore, NodeIndexer, NodeLiveSync};
pub use rpc::{NodeRpcClient, RpcError};
pub use runtime::config::{SyncConfig, SyncConfigBuilder, SyncConfigParams};
pub use runtime::lifecycle::{WorkerRuntime, WorkerRuntimeParams};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use supervisor::{CommandSpawner, ProcessRole, ProcessSupervisor, WorkerSpawner};
pub use sync::{
    LiveSync, PriorityFlag, PriorityReader, RetryTimer, SyncError, SyncStep, UpdateScheduler,
};
