use crate::events::hub::EventHub;
use crate::indexer::steps::IndexingSteps;
use crate::node::index::{HistoryStore, NodeIndexer};
use crate::node::live::NodeLiveSync;
use crate::rpc::client::NodeRpcClient;
use crate::runtime::config::SyncConfig;
use crate::runtime::lifecycle::{WorkerRuntime, WorkerRuntimeParams};
use crate::runtime::telemetry::Telemetry;
use crate::sync::steps::LiveSync;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives one worker runtime and handles OS signals for graceful shutdowns.
pub struct Runner<S: LiveSync, I: IndexingSteps> {
    runtime: WorkerRuntime<S, I>,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner<NodeLiveSync, NodeIndexer> {
    /// Wires the node-backed live sync and indexer against `config`.
    pub fn for_node(config: SyncConfig, worker_id: Option<usize>) -> Result<Self> {
        let telemetry = Arc::new(Telemetry::default());
        let hub = Arc::new(EventHub::with_telemetry(telemetry.clone()));
        let rpc = NodeRpcClient::from_config(&config)?;

        let live = Arc::new(NodeLiveSync::new(
            rpc.clone(),
            hub.clone(),
            config.initial_blocks(),
        ));
        let indexer = Arc::new(NodeIndexer::new(
            rpc,
            Arc::new(HistoryStore::new()),
            config.index_depth(),
        ));

        Ok(Self::new(WorkerRuntime::new(WorkerRuntimeParams {
            config,
            live,
            indexer,
            hub,
            telemetry,
            worker_id,
        })))
    }
}

impl<S: LiveSync, I: IndexingSteps> Runner<S, I> {
    pub fn new(runtime: WorkerRuntime<S, I>) -> Self {
        Self {
            runtime,
            shutdown: CancellationToken::new(),
            started: false,
        }
    }

    pub fn runtime(&self) -> &WorkerRuntime<S, I> {
        &self.runtime
    }

    /// Root shutdown token, for callers with their own signal handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.runtime.start(&self.shutdown)?;
        self.started = true;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        self.runtime.stop().await?;
        self.started = false;
        self.shutdown = CancellationToken::new();
        Ok(())
    }

    /// Runs until Ctrl-C (SIGINT) or until the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start()?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }
}
