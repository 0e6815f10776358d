use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by the scheduler, indexer, hub feed and supervisor.
#[derive(Default, Debug)]
pub struct Telemetry {
    passes_succeeded: AtomicU64,
    passes_failed: AtomicU64,
    indexer_completed: AtomicU64,
    indexer_failed: AtomicU64,
    indexer_deferred: AtomicU64,
    events_published: AtomicU64,
    worker_respawns: AtomicU64,
    worker_spawn_failures: AtomicU64,
}

impl Telemetry {
    pub fn record_pass_succeeded(&self) {
        self.passes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_failed(&self) {
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexer_completed(&self) {
        self.indexer_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexer_failed(&self) {
        self.indexer_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexer_deferred(&self) {
        self.indexer_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker exited and is about to be replaced.
    pub fn record_worker_respawn(&self) {
        self.worker_respawns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_spawn_failure(&self) {
        self.worker_spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            passes_succeeded: self.passes_succeeded.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            indexer_completed: self.indexer_completed.load(Ordering::Relaxed),
            indexer_failed: self.indexer_failed.load(Ordering::Relaxed),
            indexer_deferred: self.indexer_deferred.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            worker_respawns: self.worker_respawns.load(Ordering::Relaxed),
            worker_spawn_failures: self.worker_spawn_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub passes_succeeded: u64,
    pub passes_failed: u64,
    pub indexer_completed: u64,
    pub indexer_failed: u64,
    pub indexer_deferred: u64,
    pub events_published: u64,
    pub worker_respawns: u64,
    pub worker_spawn_failures: u64,
}

/// Spawns a background task that periodically logs pass, indexer, and event counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_snapshot = telemetry.snapshot();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "protomempool::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let events_delta = current
                        .events_published
                        .saturating_sub(last_snapshot.events_published);

                    tracing::info!(
                        target: "protomempool::metrics",
                        passes_succeeded = current.passes_succeeded,
                        passes_failed = current.passes_failed,
                        indexer_completed = current.indexer_completed,
                        indexer_failed = current.indexer_failed,
                        indexer_deferred = current.indexer_deferred,
                        events_published = current.events_published,
                        events_since_last = events_delta,
                        worker_respawns = current.worker_respawns,
                        worker_spawn_failures = current.worker_spawn_failures,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                }
            }
        }
    }
    .in_current_span())
}
