use anyhow::Result;
use protomempool::runtime::telemetry::spawn_metrics_reporter;
use protomempool::{
    init_tracing, CommandSpawner, EventKind, LiveFeed, ProcessRole, ProcessSupervisor, Runner,
    SyncConfig, Telemetry,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = SyncConfig::from_env()?;
    match ProcessRole::detect(config.worker_processes())? {
        ProcessRole::Supervisor { count } => run_supervisor(&config, count).await,
        ProcessRole::Worker(worker_id) => run_worker(config, worker_id).await,
    }
}

async fn run_supervisor(config: &SyncConfig, count: usize) -> Result<()> {
    let telemetry = Arc::new(Telemetry::default());
    let shutdown = CancellationToken::new();
    let supervisor = ProcessSupervisor::new(
        CommandSpawner::current_exe()?,
        count,
        config.respawn_delay(),
        telemetry.clone(),
    );

    let handle = supervisor.start(shutdown.clone());
    let metrics = spawn_metrics_reporter(telemetry, shutdown.clone(), config.metrics_interval());

    signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received; stopping workers");
    handle.shutdown().await;
    metrics.await?;
    Ok(())
}

async fn run_worker(config: SyncConfig, worker_id: Option<usize>) -> Result<()> {
    let mut runner = Runner::for_node(config, worker_id)?;

    let feed = LiveFeed::attach(runner.runtime().hub(), protomempool::events::DEFAULT_FEED_CAPACITY);
    let mut events = feed.subscribe();
    let shutdown = runner.cancellation_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) if event.kind() == EventKind::NewBlock => {
                        tracing::debug!(?event, "delivered block event");
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event consumer lagging");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    runner.run_until_ctrl_c().await
}
