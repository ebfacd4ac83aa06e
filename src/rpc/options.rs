//! Tunables for the ledger REST client: per-request timeout, retry/backoff
//! limits, and circuit breaker thresholds.

use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_BREAKER_THRESHOLD: usize = 5;
const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct LedgerClientOptions {
    pub request_timeout: Duration,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub breaker_failure_threshold: usize,
    pub breaker_cooldown: Duration,
}

impl Default for LedgerClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            breaker_failure_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown: Duration::from_secs(DEFAULT_BREAKER_COOLDOWN_SECS),
        }
    }
}

impl LedgerClientOptions {
    /// Shrinks the per-request timeout so that every attempt plus the
    /// backoff between attempts completes within `budget`.
    pub fn fit_within(mut self, budget: Duration) -> Self {
        let attempts = self.max_attempts.max(1);
        let backoff: Duration = (1..attempts).map(|attempt| self.backoff_delay(attempt)).sum();
        let per_attempt =
            budget.saturating_sub(backoff) / u32::try_from(attempts).unwrap_or(u32::MAX);
        self.request_timeout = self
            .request_timeout
            .min(per_attempt)
            .max(Duration::from_millis(1));
        self
    }

    /// Delay before retry number `attempt` (1-based), doubling up to `max_backoff`.
    pub(crate) fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(multiplier)
            .min(self.max_backoff)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be smaller than initial_backoff");
        }
        if self.breaker_failure_threshold == 0 {
            bail!("breaker_failure_threshold must be greater than 0");
        }
        Ok(())
    }
}
