//! REST client for the ledger node plus the `LedgerApi` seam the fetcher
//! consumes. Every call runs through breaker gating, metrics, and bounded
//! exponential backoff; a missing version is reported as a typed
//! `LedgerApiError::NotFound` rather than retried.

use crate::rpc::auth::{build_auth_headers, LedgerAuth};
use crate::rpc::circuit_breaker::LedgerCircuitBreaker;
use crate::rpc::metrics::{LedgerMetrics, LedgerMetricsSnapshot};
use crate::rpc::options::LedgerClientOptions;
use crate::rpc::retry::{
    RetryContext, LEDGER_INFO_RETRY, TRANSACTIONS_RETRY, TRANSACTION_BY_VERSION_RETRY,
};
use crate::rpc::wire::{WireApiError, WireLedgerInfo, WireTransaction};
use crate::runtime::config::IndexerConfig;
use crate::types::{LedgerInfo, Transaction};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};

/// Application-level failures reported by the node, distinct from transport errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerApiError {
    #[error("ledger request {endpoint} timed out")]
    Timeout { endpoint: &'static str },
    #[error("ledger circuit breaker is open")]
    CircuitOpen,
    #[error("version {version} has not been produced by the ledger")]
    NotFound { version: u64 },
    #[error("ledger {endpoint} returned HTTP {status} ({code}): {message}")]
    Api {
        endpoint: &'static str,
        status: u16,
        code: String,
        message: String,
    },
    #[error("failed to decode {endpoint} response: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
}

impl LedgerApiError {
    /// Throttling and server-side faults are worth another attempt; other API errors are not.
    fn is_retryable(&self) -> bool {
        match self {
            LedgerApiError::Timeout { .. } => true,
            LedgerApiError::Api { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            LedgerApiError::CircuitOpen
            | LedgerApiError::NotFound { .. }
            | LedgerApiError::Decode { .. } => false,
        }
    }
}

/// Ledger node operations the indexer depends on.
pub trait LedgerApi: Send + Sync {
    fn ledger_info(&self) -> BoxFuture<'_, Result<LedgerInfo>>;

    /// Up to `limit` transactions starting at `start`, in version order.
    fn transactions(&self, start: u64, limit: u16) -> BoxFuture<'_, Result<Vec<Transaction>>>;

    fn transaction_by_version(&self, version: u64) -> BoxFuture<'_, Result<Transaction>>;
}

#[derive(Debug, Clone)]
pub struct LedgerClient {
    base_url: Arc<String>,
    http: reqwest::Client,
    options: LedgerClientOptions,
    metrics: Arc<LedgerMetrics>,
    breaker: Arc<LedgerCircuitBreaker>,
}

impl LedgerApi for LedgerClient {
    fn ledger_info(&self) -> BoxFuture<'_, Result<LedgerInfo>> {
        Box::pin(self.get_ledger_info())
    }

    fn transactions(&self, start: u64, limit: u16) -> BoxFuture<'_, Result<Vec<Transaction>>> {
        Box::pin(self.get_transactions(start, limit))
    }

    fn transaction_by_version(&self, version: u64) -> BoxFuture<'_, Result<Transaction>> {
        Box::pin(self.get_transaction_by_version(version))
    }
}

impl LedgerClient {
    pub fn new(url: impl Into<String>, auth: LedgerAuth) -> Result<Self> {
        Self::with_options(url, auth, LedgerClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        auth: LedgerAuth,
        options: LedgerClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let base_url = url.into().trim().trim_end_matches('/').to_owned();
        let http = reqwest::Client::builder()
            .default_headers(build_auth_headers(&auth)?)
            .timeout(options.request_timeout)
            .build()
            .context("failed to build ledger HTTP client")?;
        let breaker = Arc::new(LedgerCircuitBreaker::new(
            options.breaker_failure_threshold,
            options.breaker_cooldown,
        ));

        Ok(Self {
            base_url: Arc::new(base_url),
            http,
            options,
            metrics: Arc::new(LedgerMetrics::default()),
            breaker,
        })
    }

    pub fn from_config(config: &IndexerConfig) -> Result<Self> {
        let auth = match config.api_key() {
            Some(key) => LedgerAuth::Bearer(key.to_owned()),
            None => LedgerAuth::None,
        };
        // The tailer bounds every fetch by `fetch_timeout`; retries must fit inside it.
        let options = LedgerClientOptions::default().fit_within(config.fetch_timeout());
        Self::with_options(config.node_url(), auth, options)
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> LedgerMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub async fn get_ledger_info(&self) -> Result<LedgerInfo> {
        let url = format!("{}/v1", self.base_url);
        self.retry_with_breaker(RetryContext::new(&LEDGER_INFO_RETRY), None, || async {
            let wire: WireLedgerInfo = self.get_json(LEDGER_INFO_RETRY.endpoint, &url, None).await?;
            Ok(LedgerInfo::from(wire))
        })
        .await
    }

    pub async fn get_transactions(&self, start: u64, limit: u16) -> Result<Vec<Transaction>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(u64::from(limit) - 1);
        let url = format!(
            "{}/v1/transactions?start={start}&limit={limit}",
            self.base_url
        );
        let context = RetryContext::with_versions(&TRANSACTIONS_RETRY, start, end);

        let result = self
            .retry_with_breaker(context, Some(start), || async {
                let wire: Vec<WireTransaction> = self
                    .get_json(TRANSACTIONS_RETRY.endpoint, &url, Some(start))
                    .await?;
                Ok(wire.into_iter().map(Transaction::from).collect::<Vec<_>>())
            })
            .await;

        // A range starting past the tip is simply empty.
        match result {
            Err(err)
                if matches!(
                    err.downcast_ref::<LedgerApiError>(),
                    Some(LedgerApiError::NotFound { .. })
                ) =>
            {
                Ok(Vec::new())
            }
            other => other,
        }
    }

    pub async fn get_transaction_by_version(&self, version: u64) -> Result<Transaction> {
        let url = format!("{}/v1/transactions/by_version/{version}", self.base_url);
        let context = RetryContext::with_versions(&TRANSACTION_BY_VERSION_RETRY, version, version);
        self.retry_with_breaker(context, Some(version), || async {
            let wire: WireTransaction = self
                .get_json(TRANSACTION_BY_VERSION_RETRY.endpoint, &url, Some(version))
                .await?;
            Ok(Transaction::from(wire))
        })
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &str,
        version: Option<u64>,
    ) -> Result<T> {
        let response = self.http.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                anyhow::Error::new(LedgerApiError::Timeout { endpoint })
            } else {
                anyhow!("ledger request {endpoint} failed: {err}")
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            if let Some(version) = version {
                return Err(LedgerApiError::NotFound { version }.into());
            }
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: WireApiError = serde_json::from_str(&body).unwrap_or_default();
            return Err(LedgerApiError::Api {
                endpoint,
                status: status.as_u16(),
                code: parsed.error_code,
                message: if parsed.message.is_empty() {
                    body
                } else {
                    parsed.message
                },
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                anyhow::Error::new(LedgerApiError::Timeout { endpoint })
            } else {
                anyhow!("failed to read {endpoint} response body: {err}")
            }
        })?;

        serde_json::from_slice(&bytes).map_err(|err| {
            LedgerApiError::Decode {
                endpoint,
                reason: err.to_string(),
            }
            .into()
        })
    }

    /// Shared retry loop with breaker gating, metrics, and exponential backoff.
    async fn retry_with_breaker<T, F, Fut>(
        &self,
        context: RetryContext<'_>,
        probe_version: Option<u64>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let permit = match self.breaker.try_acquire() {
                Some(permit) => {
                    context.log_permit(permit.state());
                    permit
                }
                None => {
                    context.log_circuit_open();
                    return Err(LedgerApiError::CircuitOpen.into());
                }
            };

            attempt += 1;
            let start = Instant::now();

            let err = match operation().await {
                Ok(value) => {
                    self.metrics.record_success(start.elapsed());
                    permit.succeed();
                    tracing::trace!(endpoint = context.endpoint(), attempt, "ledger request completed");
                    return Ok(value);
                }
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            let retryable = match err.downcast_ref::<LedgerApiError>() {
                Some(LedgerApiError::NotFound { version }) => {
                    // The node answered; it simply has not reached this version.
                    self.metrics.record_success(elapsed);
                    permit.succeed();
                    context.log_not_found(attempt, probe_version.unwrap_or(*version));
                    return Err(err);
                }
                Some(LedgerApiError::Timeout { .. }) => {
                    self.metrics.record_timeout(elapsed);
                    permit.fail();
                    true
                }
                Some(api_error) => {
                    self.metrics.record_failure(elapsed);
                    permit.fail();
                    api_error.is_retryable()
                }
                None => {
                    self.metrics.record_failure(elapsed);
                    permit.fail();
                    true
                }
            };

            if !retryable || attempt >= self.options.max_attempts {
                context.log_exhausted(attempt, &err);
                return Err(err);
            }

            let backoff = self.backoff_delay(attempt);
            context.log_retry(attempt, backoff, &err);
            sleep(backoff).await;
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        self.options.backoff_delay(attempt)
    }
}
