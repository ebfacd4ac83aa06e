//! Log templates and version context shared by the ledger client's retry
//! loop, so every endpoint reports breaker rejections, retries, and
//! exhaustion the same way.

use crate::rpc::circuit_breaker::CircuitState;
use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_versions {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some((start, end)) = $ctx.versions {
            tracing::$level!(
                endpoint = $ctx.messages.endpoint,
                start_version = start,
                end_version = end,
                $($rest)*
            );
        } else {
            tracing::$level!(endpoint = $ctx.messages.endpoint, $($rest)*);
        }
    }};
}

#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) endpoint: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) not_found: Option<&'static str>,
}

#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    versions: Option<(u64, u64)>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self {
            versions: None,
            messages,
        }
    }

    pub(crate) fn with_versions(messages: &'a RetryMessages, start: u64, end: u64) -> Self {
        Self {
            versions: Some((start, end)),
            messages,
        }
    }

    pub(crate) fn endpoint(&self) -> &'static str {
        self.messages.endpoint
    }

    pub(crate) fn log_permit(&self, state: CircuitState) {
        log_with_versions!(trace, self, breaker_state = ?state, "circuit breaker permit acquired");
    }

    pub(crate) fn log_circuit_open(&self) {
        log_with_versions!(warn, self, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_not_found(&self, attempt: usize, version: u64) {
        if let Some(message) = self.messages.not_found {
            log_with_versions!(debug, self, attempt, missing_version = version, "{}", message);
        }
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error) {
        let backoff_ms = backoff.as_millis().min(u128::from(u64::MAX)) as u64;
        log_with_versions!(warn, self, attempt, backoff_ms, error = %err, "{}", self.messages.retry);
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error) {
        log_with_versions!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }
}

pub(crate) const LEDGER_INFO_RETRY: RetryMessages = RetryMessages {
    endpoint: "ledger_info",
    circuit_open: "ledger circuit breaker open; rejecting ledger info request",
    retry: "ledger info request failed; retrying",
    exhausted: "ledger info request exhausted retries",
    not_found: None,
};

pub(crate) const TRANSACTIONS_RETRY: RetryMessages = RetryMessages {
    endpoint: "transactions",
    circuit_open: "ledger circuit breaker open; rejecting transaction range",
    retry: "transaction range request failed; retrying",
    exhausted: "transaction range request exhausted retries",
    not_found: Some("transaction range starts beyond the ledger tip"),
};

pub(crate) const TRANSACTION_BY_VERSION_RETRY: RetryMessages = RetryMessages {
    endpoint: "transaction_by_version",
    circuit_open: "ledger circuit breaker open; rejecting single transaction",
    retry: "transaction lookup failed; retrying",
    exhausted: "transaction lookup exhausted retries",
    not_found: Some("requested version not produced yet"),
};
