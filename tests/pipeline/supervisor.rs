#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::support::helpers::{init_tracing, wait_until};
use anyhow::{Context, Result};
use protomempool::supervisor::WorkerDescriptor;
use protomempool::{CommandSpawner, ProcessSupervisor, Telemetry};
use tokio_util::sync::CancellationToken;

const RESPAWN_DELAY: Duration = Duration::from_millis(300);

fn start_log() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("protomempool-workers-{}-{nanos}.log", std::process::id()))
}

fn started_ids(log: &PathBuf) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn pid_of(workers: &[WorkerDescriptor], logical_id: usize) -> Option<u32> {
    workers
        .iter()
        .find(|worker| worker.logical_id == logical_id)
        .and_then(|worker| worker.pid)
}

#[tokio::test]
async fn killed_worker_is_respawned_with_its_logical_id() -> Result<()> {
    init_tracing();
    let log = start_log();
    let spawner = CommandSpawner::new("/bin/sh")
        .arg("-c")
        .arg("echo \"$PROTOMEMPOOL_WORKER_ID\" >> \"$WORKER_LOG\"; exec sleep 30")
        .env("WORKER_LOG", &log)
        .inherit_stdio(false);
    let telemetry = Arc::new(Telemetry::default());
    let supervisor = ProcessSupervisor::new(spawner, 3, RESPAWN_DELAY, telemetry.clone());
    let handle = supervisor.start(CancellationToken::new());

    wait_until(Duration::from_secs(5), || started_ids(&log).len() == 3).await?;
    let before = supervisor.alive_workers();
    assert_eq!(before.len(), 3);
    let mut ids = started_ids(&log);
    ids.sort();
    assert_eq!(ids, vec!["0", "1", "2"]);

    let victim = pid_of(&before, 1).context("worker 1 pid")?;
    let killed_at = tokio::time::Instant::now();
    let status = std::process::Command::new("kill")
        .arg("-9")
        .arg(victim.to_string())
        .status()
        .context("failed to run kill")?;
    assert!(status.success());

    wait_until(Duration::from_secs(5), || started_ids(&log).len() == 4).await?;
    assert!(killed_at.elapsed() >= RESPAWN_DELAY, "respawn must wait the fixed delay");
    assert_eq!(started_ids(&log).last().map(String::as_str), Some("1"));

    wait_until(Duration::from_secs(5), || {
        supervisor.alive_workers().len() == 3
    })
    .await?;
    let after = supervisor.alive_workers();
    assert_ne!(pid_of(&after, 1), Some(victim));
    assert_eq!(pid_of(&after, 0), pid_of(&before, 0));
    assert_eq!(pid_of(&after, 2), pid_of(&before, 2));

    tokio::time::sleep(RESPAWN_DELAY * 2).await;
    assert_eq!(started_ids(&log).len(), 4, "exactly one replacement per exit");
    assert_eq!(telemetry.snapshot().worker_respawns, 1);

    handle.shutdown().await;
    assert!(supervisor.alive_workers().is_empty());
    let _ = std::fs::remove_file(&log);
    Ok(())
}

#[tokio::test]
async fn crashing_worker_is_retried_at_fixed_delay() -> Result<()> {
    init_tracing();
    let log = start_log();
    let spawner = CommandSpawner::new("/bin/sh")
        .arg("-c")
        .arg("echo \"$PROTOMEMPOOL_WORKER_ID\" >> \"$WORKER_LOG\"; exit 3")
        .env("WORKER_LOG", &log)
        .inherit_stdio(false);
    let supervisor = ProcessSupervisor::new(
        spawner,
        1,
        Duration::from_millis(100),
        Arc::new(Telemetry::default()),
    );
    let handle = supervisor.start(CancellationToken::new());

    wait_until(Duration::from_secs(5), || started_ids(&log).len() >= 4).await?;
    assert!(started_ids(&log).iter().all(|id| id == "0"));

    handle.shutdown().await;
    let _ = std::fs::remove_file(&log);
    Ok(())
}
