//! Keeps a fixed set of worker processes alive.
//!
//! One monitor task per logical id spawns the worker, waits for it to exit,
//! then waits the respawn delay and spawns a replacement with the same id. There
//! is no crash-loop limit: a worker that keeps dying is retried forever.

use crate::runtime::telemetry::Telemetry;
use crate::supervisor::process::{WorkerProcess, WorkerSpawner};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RESPAWN_DELAY: Duration = Duration::from_secs(10);

/// A live worker. The pid changes on every respawn; the logical id does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub logical_id: usize,
    pub pid: Option<u32>,
}

type WorkerTable = Arc<Mutex<BTreeMap<usize, WorkerDescriptor>>>;

pub struct ProcessSupervisor<W: WorkerSpawner> {
    spawner: Arc<W>,
    worker_count: usize,
    respawn_delay: Duration,
    telemetry: Arc<Telemetry>,
    workers: WorkerTable,
}

impl<W: WorkerSpawner> ProcessSupervisor<W> {
    pub fn new(
        spawner: W,
        worker_count: usize,
        respawn_delay: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            spawner: Arc::new(spawner),
            worker_count,
            respawn_delay,
            telemetry,
            workers: Arc::default(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn alive_workers(&self) -> Vec<WorkerDescriptor> {
        lock_table(&self.workers).values().copied().collect()
    }

    /// Starts one monitor per logical id `0..worker_count`.
    pub fn start(&self, shutdown: CancellationToken) -> SupervisorHandle {
        tracing::info!(
            workers = self.worker_count,
            respawn_delay_secs = self.respawn_delay.as_secs(),
            "starting worker supervisor"
        );

        let monitors = (0..self.worker_count)
            .map(|logical_id| {
                let monitor = WorkerMonitor {
                    logical_id,
                    spawner: self.spawner.clone(),
                    respawn_delay: self.respawn_delay,
                    telemetry: self.telemetry.clone(),
                    workers: self.workers.clone(),
                };
                tokio::spawn(monitor.run(shutdown.clone()))
            })
            .collect();

        SupervisorHandle { shutdown, monitors }
    }
}

pub struct SupervisorHandle {
    shutdown: CancellationToken,
    monitors: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Kills every worker and waits for the monitors to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Waits for the monitors, which only end once the token is cancelled.
    pub async fn join(self) {
        for monitor in self.monitors {
            if let Err(err) = monitor.await {
                tracing::error!(error = %err, "worker monitor panicked");
            }
        }
    }
}

struct WorkerMonitor<W: WorkerSpawner> {
    logical_id: usize,
    spawner: Arc<W>,
    respawn_delay: Duration,
    telemetry: Arc<Telemetry>,
    workers: WorkerTable,
}

impl<W: WorkerSpawner> WorkerMonitor<W> {
    async fn run(self, shutdown: CancellationToken) {
        let logical_id = self.logical_id;

        while !shutdown.is_cancelled() {
            match self.spawner.spawn(logical_id) {
                Ok(process) => {
                    if !self.watch(process, &shutdown).await {
                        break;
                    }
                    self.telemetry.record_worker_respawn();
                }
                Err(err) => {
                    self.telemetry.record_worker_spawn_failure();
                    tracing::error!(worker_id = logical_id, error = ?err, "failed to spawn worker");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.respawn_delay) => {}
            }
        }

        lock_table(&self.workers).remove(&logical_id);
        tracing::debug!(worker_id = logical_id, "worker monitor stopped");
    }

    /// Returns false when the supervisor is shutting down.
    async fn watch(&self, mut process: Box<dyn WorkerProcess>, shutdown: &CancellationToken) -> bool {
        let logical_id = self.logical_id;
        let pid = process.pid();
        lock_table(&self.workers).insert(logical_id, WorkerDescriptor { logical_id, pid });
        tracing::info!(worker_id = logical_id, ?pid, "worker started");

        let exit = tokio::select! {
            _ = shutdown.cancelled() => None,
            exit = process.wait() => Some(exit),
        };

        lock_table(&self.workers).remove(&logical_id);

        match exit {
            None => {
                if let Err(err) = process.kill().await {
                    tracing::warn!(worker_id = logical_id, ?pid, error = ?err, "failed to stop worker");
                }
                false
            }
            Some(Ok(exit)) => {
                tracing::warn!(
                    worker_id = logical_id,
                    ?pid,
                    %exit,
                    respawn_in_secs = self.respawn_delay.as_secs(),
                    "worker exited; respawning"
                );
                true
            }
            Some(Err(err)) => {
                tracing::warn!(
                    worker_id = logical_id,
                    ?pid,
                    error = ?err,
                    respawn_in_secs = self.respawn_delay.as_secs(),
                    "lost track of worker; respawning"
                );
                true
            }
        }
    }
}

fn lock_table(
    table: &Mutex<BTreeMap<usize, WorkerDescriptor>>,
) -> std::sync::MutexGuard<'_, BTreeMap<usize, WorkerDescriptor>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
