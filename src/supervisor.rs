pub mod pool;
pub mod process;

pub use pool::{ProcessSupervisor, SupervisorHandle, WorkerDescriptor, DEFAULT_RESPAWN_DELAY};
pub use process::{
    CommandSpawner, ProcessRole, WorkerExit, WorkerProcess, WorkerSpawner, WORKER_ID_ENV,
};
