//! Per-process lifecycle: the update scheduler, the indexer trigger and the
//! metrics reporter, all running inside one `worker` span.

use crate::events::hub::EventHub;
use crate::indexer::job::IndexerJob;
use crate::indexer::steps::IndexingSteps;
use crate::runtime::config::SyncConfig;
use crate::runtime::telemetry::{self, Telemetry};
use crate::sync::scheduler::UpdateScheduler;
use crate::sync::steps::LiveSync;
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Span;

pub struct WorkerRuntimeParams<S: LiveSync, I: IndexingSteps> {
    pub config: SyncConfig,
    pub live: Arc<S>,
    pub indexer: Arc<I>,
    pub hub: Arc<EventHub>,
    pub telemetry: Arc<Telemetry>,
    /// Logical id assigned by the supervisor, if any.
    pub worker_id: Option<usize>,
}

struct RunningTasks {
    run_token: CancellationToken,
    scheduler: JoinHandle<()>,
    indexer: JoinHandle<()>,
    metrics: JoinHandle<()>,
}

pub struct WorkerRuntime<S: LiveSync, I: IndexingSteps> {
    config: SyncConfig,
    live: Arc<S>,
    job: Arc<IndexerJob<I>>,
    hub: Arc<EventHub>,
    telemetry: Arc<Telemetry>,
    worker_id: Option<usize>,
    span: Span,
    tasks: Option<RunningTasks>,
}

impl<S: LiveSync, I: IndexingSteps> WorkerRuntime<S, I> {
    pub fn new(params: WorkerRuntimeParams<S, I>) -> Self {
        let WorkerRuntimeParams {
            config,
            live,
            indexer,
            hub,
            telemetry,
            worker_id,
        } = params;

        let job = Arc::new(IndexerJob::new(
            indexer,
            live.priority(),
            config.indexing_enabled(),
            telemetry.clone(),
        ));
        let span = match worker_id {
            Some(id) => tracing::info_span!("worker", worker_id = id),
            None => tracing::info_span!("worker", worker_id = "standalone"),
        };

        Self {
            config,
            live,
            job,
            hub,
            telemetry,
            worker_id,
            span,
            tasks: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn live(&self) -> &Arc<S> {
        &self.live
    }

    pub fn indexer_job(&self) -> &Arc<IndexerJob<I>> {
        &self.job
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_some()
    }

    /// Spawns the worker's tasks under a child of `shutdown`.
    pub fn start(&mut self, shutdown: &CancellationToken) -> Result<()> {
        if self.tasks.is_some() {
            bail!("worker runtime already started");
        }

        let _entered = self.span.enter();
        tracing::info!(
            poll_interval_ms = self.config.poll_interval().as_millis() as u64,
            indexing = self.config.indexing_enabled(),
            "starting worker runtime"
        );

        let run_token = shutdown.child_token();
        let scheduler = UpdateScheduler::from_config(
            self.live.clone(),
            &self.config,
            self.telemetry.clone(),
        )
        .spawn(run_token.clone());
        let indexer = self
            .job
            .clone()
            .spawn_trigger_loop(self.config.indexer_interval(), run_token.clone());
        let metrics = telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            run_token.clone(),
            self.config.metrics_interval(),
        );

        self.tasks = Some(RunningTasks {
            run_token,
            scheduler,
            indexer,
            metrics,
        });
        Ok(())
    }

    /// Cancels the worker's tasks and waits for them. An in-flight update pass
    /// is allowed to finish first.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(tasks) = self.tasks.take() else {
            return Ok(());
        };

        tasks.run_token.cancel();
        for (name, handle) in [
            ("scheduler", tasks.scheduler),
            ("indexer", tasks.indexer),
            ("metrics", tasks.metrics),
        ] {
            if let Err(err) = handle.await {
                self.span.in_scope(|| {
                    tracing::error!(task = name, error = %err, "worker task panicked");
                });
            }
        }

        self.span
            .in_scope(|| tracing::info!("worker runtime stopped"));
        Ok(())
    }
}
