//! Counters for node RPC calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct RpcMetrics {
    calls: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    rejections: AtomicU64,
    retries: AtomicU64,
    latency_ns: AtomicU64,
}

impl RpcMetrics {
    pub(crate) fn record_success(&self, latency: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub(crate) fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// The node answered with a JSON-RPC error object.
    pub(crate) fn record_rejection(&self, latency: Duration) {
        self.record_failure(latency);
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RpcMetricsSnapshot {
        let calls = self.calls.load(Ordering::Relaxed);
        let latency_ns = self.latency_ns.load(Ordering::Relaxed);
        let average_latency_ms = if calls == 0 {
            0.0
        } else {
            latency_ns as f64 / calls as f64 / 1_000_000.0
        };

        RpcMetricsSnapshot {
            calls,
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            average_latency_ms,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct RpcMetricsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejections: u64,
    pub retries: u64,
    pub average_latency_ms: f64,
}
