//! Closed/Open/Half-Open breaker guarding the ledger node. After a run of
//! consecutive failures it rejects requests for a cooldown, then admits a
//! single probe whose outcome decides whether traffic resumes.
//!
//! Admission hands out a [`BreakerPermit`]. A permit dropped before its
//! outcome is recorded (a request abandoned by an outer deadline, say)
//! counts as a failed probe, so the half-open slot is never leaked.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone)]
pub struct LedgerCircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl Default for LedgerCircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl LedgerCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            })),
            failure_threshold: failure_threshold.max(1),
            cooldown: if cooldown.is_zero() {
                Duration::from_secs(1)
            } else {
                cooldown
            },
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.lock();
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            opened_at: guard.opened_at,
        }
    }

    /// Returns `None` when the request must be rejected.
    pub fn try_acquire(&self) -> Option<BreakerPermit> {
        let state = self.admit()?;
        Some(BreakerPermit {
            breaker: self.clone(),
            state,
            settled: false,
        })
    }

    fn admit(&self) -> Option<CircuitState> {
        let mut guard = self.lock();

        if guard.state == CircuitState::Open {
            let cooled = guard
                .opened_at
                .map(|opened| opened.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if !cooled {
                return None;
            }
            Self::transition(&mut guard, CircuitState::HalfOpen);
            guard.probe_in_flight = false;
        }

        if guard.state == CircuitState::HalfOpen {
            if guard.probe_in_flight {
                return None;
            }
            guard.probe_in_flight = true;
        }

        Some(guard.state)
    }

    pub fn record_success(&self) {
        let mut guard = self.lock();
        guard.probe_in_flight = false;
        guard.consecutive_failures = 0;
        if guard.state == CircuitState::HalfOpen {
            guard.opened_at = None;
            Self::transition(&mut guard, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self.lock();
        guard.probe_in_flight = false;
        guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);

        let trip = match guard.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => guard.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            guard.opened_at = Some(Instant::now());
            Self::transition(&mut guard, CircuitState::Open);
        }
    }

    /// Gives back a half-open slot whose request never reported an outcome.
    fn abandon(&self, admitted: CircuitState) {
        if admitted != CircuitState::HalfOpen {
            return;
        }
        let probing = {
            let guard = self.lock();
            guard.state == CircuitState::HalfOpen && guard.probe_in_flight
        };
        if probing {
            tracing::debug!("half-open probe abandoned before completing");
            self.record_failure();
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(state: &mut BreakerState, next: CircuitState) {
        if state.state != next {
            tracing::warn!(
                previous = ?state.state,
                next = ?next,
                consecutive_failures = state.consecutive_failures,
                "ledger circuit breaker state changed"
            );
            state.state = next;
        }
    }
}

/// Admission to call the node. Settle it with [`BreakerPermit::succeed`] or
/// [`BreakerPermit::fail`]; dropping it unsettled releases a half-open slot
/// as a failure.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: LedgerCircuitBreaker,
    state: CircuitState,
    settled: bool,
}

impl BreakerPermit {
    /// Breaker state at admission.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.state);
        }
    }
}
