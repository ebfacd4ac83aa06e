//! Request counters for the ledger client: totals, failures, timeouts, and
//! cumulative latency, exposed as a point-in-time snapshot.

use crate::rpc::circuit_breaker::CircuitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct LedgerMetrics {
    requests: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    latency_ns: AtomicU64,
}

impl LedgerMetrics {
    pub(crate) fn record_success(&self, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub(crate) fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        let nanos = latency.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.latency_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> LedgerMetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let latency_ns = self.latency_ns.load(Ordering::Relaxed);
        let (average_latency_ms, error_rate) = if requests == 0 {
            (0.0, 0.0)
        } else {
            (
                latency_ns as f64 / requests as f64 / 1_000_000.0,
                failures as f64 / requests as f64,
            )
        };

        LedgerMetricsSnapshot {
            requests,
            failures,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            average_latency_ms,
            error_rate,
            breaker_state,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct LedgerMetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub breaker_state: CircuitState,
}
