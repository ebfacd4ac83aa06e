//! Ledger node REST client plumbing: authentication, circuit breaker,
//! metrics, retry policy, and the wire format of the node's JSON responses.

pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod metrics;
pub mod options;
pub mod retry;
pub(crate) mod wire;

pub use auth::LedgerAuth;
pub use circuit_breaker::{BreakerPermit, CircuitBreakerSnapshot, CircuitState, LedgerCircuitBreaker};
pub use client::{LedgerApi, LedgerApiError, LedgerClient};
pub use metrics::LedgerMetricsSnapshot;
pub use options::LedgerClientOptions;
