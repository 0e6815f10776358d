//! Low-priority historical indexing job.
//!
//! `IndexerJob::run` is safe to call as often as an external trigger likes. It
//! only does work when indexing is enabled, a run has been requested, no run is
//! in flight, and the live sync is not asserting its priority flag. The
//! check-then-set of that gate happens under one mutex so concurrent triggers
//! can never start two passes.

use crate::indexer::steps::{IndexingError, IndexingStep, IndexingSteps};
use crate::runtime::telemetry::Telemetry;
use crate::sync::priority::PriorityReader;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// `run_requested` is sticky until a pass starts; `running` is true only while a
/// pass is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerRunState {
    pub run_requested: bool,
    pub running: bool,
}

impl Default for IndexerRunState {
    fn default() -> Self {
        Self {
            run_requested: true,
            running: false,
        }
    }
}

/// Why a call to [`IndexerJob::run`] did or did not index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerRun {
    Disabled,
    NotRequested,
    AlreadyRunning,
    Deferred,
    Completed,
    Failed(IndexingStep),
}

pub struct IndexerJob<I: IndexingSteps> {
    steps: Arc<I>,
    priority: PriorityReader,
    enabled: bool,
    state: Arc<Mutex<IndexerRunState>>,
    telemetry: Arc<Telemetry>,
}

impl<I: IndexingSteps> IndexerJob<I> {
    pub fn new(
        steps: Arc<I>,
        priority: PriorityReader,
        enabled: bool,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            steps,
            priority,
            enabled,
            state: Arc::new(Mutex::new(IndexerRunState::default())),
            telemetry,
        }
    }

    pub fn steps(&self) -> &Arc<I> {
        &self.steps
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> IndexerRunState {
        *lock_state(&self.state)
    }

    /// Requests a full pass on the next trigger.
    pub fn reindex(&self) {
        lock_state(&self.state).run_requested = true;
    }

    /// Attempts one indexing pass.
    pub async fn run(&self) -> IndexerRun {
        let mut running = match self.try_start() {
            Ok(guard) => guard,
            Err(skipped) => {
                if skipped == IndexerRun::Deferred {
                    self.telemetry.record_indexer_deferred();
                    tracing::debug!("live sync has priority; deferring indexing");
                }
                return skipped;
            }
        };

        tracing::info!("indexing pass started");

        let result = self.run_pipeline().await;
        running.settled = true;
        match result {
            Ok(()) => {
                self.telemetry.record_indexer_completed();
                tracing::info!("indexing pass completed");
                IndexerRun::Completed
            }
            Err(err) => {
                self.reindex();
                self.telemetry.record_indexer_failed();
                tracing::error!(
                    step = err.step().as_str(),
                    error = %err,
                    "indexer failed, trying again later"
                );
                IndexerRun::Failed(err.step())
            }
        }
    }

    /// Calls [`Self::run`] every `period` until `shutdown` is cancelled. A pass
    /// still in flight at cancellation is dropped and re-armed.
    pub async fn run_trigger_loop(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::info!("shutdown requested; abandoning indexing pass");
                            break;
                        }
                        outcome = self.run() => {
                            tracing::trace!(?outcome, "indexer trigger fired");
                        }
                    }
                }
            }
        }

        tracing::info!("indexer trigger stopped");
    }

    pub fn spawn_trigger_loop(
        self: Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run_trigger_loop(period, shutdown).in_current_span())
    }

    fn try_start(&self) -> Result<RunningGuard, IndexerRun> {
        let mut state = lock_state(&self.state);

        if !self.enabled {
            return Err(IndexerRun::Disabled);
        }
        if !state.run_requested {
            return Err(IndexerRun::NotRequested);
        }
        if state.running {
            return Err(IndexerRun::AlreadyRunning);
        }
        if self.priority.has_priority() {
            return Err(IndexerRun::Deferred);
        }

        state.run_requested = false;
        state.running = true;
        Ok(RunningGuard {
            state: self.state.clone(),
            settled: false,
        })
    }

    async fn run_pipeline(&self) -> Result<(), IndexingError> {
        for step in IndexingStep::ORDER {
            let result = self.steps.run_step(step).await;
            match result {
                Ok(()) => tracing::debug!(step = step.as_str(), "indexing step finished"),
                Err(err) if step.is_advisory() => {
                    tracing::error!(
                        step = step.as_str(),
                        error = %err,
                        "cannot reset hashrate indexing timestamps"
                    );
                }
                Err(err) => return Err(IndexingError::new(step, err)),
            }
        }
        Ok(())
    }
}

/// Clears `running` when the pass ends, whether it finished, failed, panicked or
/// was dropped mid-flight. A pass that never settled is re-armed.
struct RunningGuard {
    state: Arc<Mutex<IndexerRunState>>,
    settled: bool,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        if !self.settled {
            state.run_requested = true;
        }
        state.running = false;
    }
}

fn lock_state(state: &Mutex<IndexerRunState>) -> MutexGuard<'_, IndexerRunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
