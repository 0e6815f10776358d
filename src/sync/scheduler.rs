//! The high-priority update loop.
//!
//! One pass runs node status, new blocks and mempool synchronization strictly in
//! that order. A successful pass schedules the next one after the fixed poll
//! interval; a failed pass aborts its remaining steps and schedules the next one
//! after the current backoff delay. The loop never terminates on failure, and a
//! new pass only starts once the previous one has fully completed. A step that
//! panics, including through an event handler it invokes, counts as a failed
//! step.

use crate::runtime::config::SyncConfig;
use crate::runtime::telemetry::Telemetry;
use crate::sync::backoff::RetryTimer;
use crate::sync::steps::{LiveSync, SyncError, SyncStep};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Succeeded,
    Failed(SyncStep),
}

/// Result of one pass together with the delay before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledPass {
    pub outcome: PassOutcome,
    pub delay: Duration,
}

pub struct UpdateScheduler<S: LiveSync> {
    live: Arc<S>,
    retry: RetryTimer,
    poll_interval: Duration,
    telemetry: Arc<Telemetry>,
}

impl<S: LiveSync> UpdateScheduler<S> {
    pub fn new(
        live: Arc<S>,
        poll_interval: Duration,
        retry: RetryTimer,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            live,
            retry,
            poll_interval,
            telemetry,
        }
    }

    pub fn from_config(live: Arc<S>, config: &SyncConfig, telemetry: Arc<Telemetry>) -> Self {
        Self::new(live, config.poll_interval(), config.retry_timer(), telemetry)
    }

    pub fn retry_timer(&self) -> &RetryTimer {
        &self.retry
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs the three sync steps in order, stopping at the first failure.
    pub async fn run_pass(&self) -> Result<(), SyncError> {
        for step in SyncStep::ORDER {
            let future = match step {
                SyncStep::NodeStatus => self.live.sync_node_status(),
                SyncStep::NewBlocks => self.live.sync_new_blocks(),
                SyncStep::Mempool => self.live.sync_mempool(),
            };
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(SyncError::new(step, err)),
                Err(panic_payload) => {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(step = step.as_str(), panic = %panic_msg, "sync step panicked");
                    return Err(SyncError::new(
                        step,
                        anyhow::anyhow!("{} step panicked: {panic_msg}", step.as_str()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Runs one pass and settles the backoff state. The returned delay is computed
    /// after the pass completed.
    pub async fn tick(&mut self) -> ScheduledPass {
        match self.run_pass().await {
            Ok(()) => {
                self.retry.reset();
                self.telemetry.record_pass_succeeded();
                tracing::trace!(next_in = ?self.poll_interval, "update pass completed");
                ScheduledPass {
                    outcome: PassOutcome::Succeeded,
                    delay: self.poll_interval,
                }
            }
            Err(err) => {
                let escalated = self.retry.is_escalated();
                let delay = self.retry.on_failure();
                self.telemetry.record_pass_failed();

                // A single miss is likely transient; keep it quiet until backoff grows.
                if escalated {
                    tracing::warn!(
                        step = err.step().as_str(),
                        error = %err,
                        retry_in_secs = delay.as_secs(),
                        "update pass failed; retrying"
                    );
                } else {
                    tracing::debug!(
                        step = err.step().as_str(),
                        error = %err,
                        retry_in_secs = delay.as_secs(),
                        "update pass failed; retrying"
                    );
                }
                tracing::debug!(error = ?err, "update pass failure details");

                ScheduledPass {
                    outcome: PassOutcome::Failed(err.step()),
                    delay,
                }
            }
        }
    }

    /// Loops until `shutdown` is cancelled. Cancellation is observed between passes,
    /// so an in-flight pass always completes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(poll_interval = ?self.poll_interval, "update scheduler started");

        while !shutdown.is_cancelled() {
            let scheduled = self.tick().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(scheduled.delay) => {}
            }
        }

        tracing::info!("update scheduler stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown).in_current_span())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
