use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::time::Duration;

const DEFAULT_BATCH_SIZE: u16 = 500;
const DEFAULT_START_VERSION: u64 = 0;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROCESSOR_TIMEOUT_SECS: u64 = 300;
const DEFAULT_IDLE_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_SECS: u64 = 30;
const DEFAULT_CHECKPOINT_RETRY_ATTEMPTS: usize = 5;
const DEFAULT_DECODE_WORKERS: usize = 4;

/// Runtime configuration for the indexer.
///
/// All instances must be constructed via [`IndexerConfig::builder`] or [`IndexerConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    node_url: String,
    api_key: Option<String>,
    batch_size: u16,
    start_version: u64,
    fetch_timeout: Duration,
    processor_timeout: Duration,
    idle_backoff: Duration,
    max_backoff: Duration,
    checkpoint_retry_attempts: usize,
    decode_workers: usize,
    metrics_interval: Duration,
    index_token_uri: bool,
}

pub struct IndexerConfigParams {
    pub node_url: String,
    pub api_key: Option<String>,
    pub batch_size: u16,
    pub start_version: u64,
    pub fetch_timeout: Duration,
    pub processor_timeout: Duration,
    pub idle_backoff: Duration,
    pub max_backoff: Duration,
    pub checkpoint_retry_attempts: usize,
    pub decode_workers: usize,
    pub metrics_interval: Duration,
    pub index_token_uri: bool,
}

impl IndexerConfig {
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    /// Constructs a configuration directly from concrete values, running the same validation
    /// as the builder.
    pub fn new(params: IndexerConfigParams) -> Result<Self> {
        let IndexerConfigParams {
            node_url,
            api_key,
            batch_size,
            start_version,
            fetch_timeout,
            processor_timeout,
            idle_backoff,
            max_backoff,
            checkpoint_retry_attempts,
            decode_workers,
            metrics_interval,
            index_token_uri,
        } = params;

        let config = Self {
            node_url: node_url.trim().to_owned(),
            api_key: api_key
                .map(|key| key.trim().to_owned())
                .filter(|key| !key.is_empty()),
            batch_size,
            start_version,
            fetch_timeout,
            processor_timeout,
            idle_backoff,
            max_backoff,
            checkpoint_retry_attempts,
            decode_workers,
            metrics_interval,
            index_token_uri,
        };

        config.validate()?;
        Ok(config)
    }

    /// Base URL of the ledger node REST API.
    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    /// Optional API key sent as a bearer token.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Maximum number of transactions requested per batch.
    pub fn batch_size(&self) -> u16 {
        self.batch_size
    }

    /// Version used when a processor has no checkpoint yet.
    pub fn start_version(&self) -> u64 {
        self.start_version
    }

    /// Deadline for a single batch fetch.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Deadline for one processor to retire one batch.
    pub fn processor_timeout(&self) -> Duration {
        self.processor_timeout
    }

    /// Sleep applied when the fetcher has caught up with the ledger tip.
    pub fn idle_backoff(&self) -> Duration {
        self.idle_backoff
    }

    /// Upper bound for the exponential backoff after failed batches.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Attempts made to advance a checkpoint before the batch is reported as failed.
    pub fn checkpoint_retry_attempts(&self) -> usize {
        self.checkpoint_retry_attempts
    }

    /// Tasks used to decode a batch inside a processor.
    pub fn decode_workers(&self) -> usize {
        self.decode_workers
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Whether token metadata is fetched from the token URI.
    pub fn index_token_uri(&self) -> bool {
        self.index_token_uri
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.node_url)?;

        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }

        if self.fetch_timeout.is_zero() {
            bail!("fetch_timeout must be greater than 0");
        }

        if self.processor_timeout.is_zero() {
            bail!("processor_timeout must be greater than 0");
        }

        if self.idle_backoff.is_zero() {
            bail!("idle_backoff must be greater than 0");
        }

        if self.max_backoff < self.idle_backoff {
            bail!("max_backoff must be at least idle_backoff");
        }

        if self.checkpoint_retry_attempts == 0 {
            bail!("checkpoint_retry_attempts must be greater than 0");
        }

        if self.decode_workers == 0 {
            bail!("decode_workers must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IndexerConfigBuilder {
    node_url: Option<String>,
    api_key: Option<String>,
    batch_size: Option<u16>,
    start_version: Option<u64>,
    fetch_timeout: Option<Duration>,
    processor_timeout: Option<Duration>,
    idle_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    checkpoint_retry_attempts: Option<usize>,
    decode_workers: Option<usize>,
    metrics_interval: Option<Duration>,
    index_token_uri: Option<bool>,
}

impl IndexerConfigBuilder {
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.node_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn batch_size(mut self, size: u16) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn start_version(mut self, version: u64) -> Self {
        self.start_version = Some(version);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn processor_timeout(mut self, timeout: Duration) -> Self {
        self.processor_timeout = Some(timeout);
        self
    }

    pub fn idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = Some(backoff);
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    pub fn checkpoint_retry_attempts(mut self, attempts: usize) -> Self {
        self.checkpoint_retry_attempts = Some(attempts);
        self
    }

    pub fn decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = Some(workers);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn index_token_uri(mut self, enabled: bool) -> Self {
        self.index_token_uri = Some(enabled);
        self
    }

    pub fn build(self) -> Result<IndexerConfig> {
        let params = IndexerConfigParams {
            node_url: self.node_url.context("node_url is required")?,
            api_key: self.api_key,
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            start_version: self.start_version.unwrap_or(DEFAULT_START_VERSION),
            fetch_timeout: self
                .fetch_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)),
            processor_timeout: self
                .processor_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_PROCESSOR_TIMEOUT_SECS)),
            idle_backoff: self
                .idle_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_IDLE_BACKOFF_MS)),
            max_backoff: self
                .max_backoff
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS)),
            checkpoint_retry_attempts: self
                .checkpoint_retry_attempts
                .unwrap_or(DEFAULT_CHECKPOINT_RETRY_ATTEMPTS),
            decode_workers: self.decode_workers.unwrap_or(DEFAULT_DECODE_WORKERS),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            index_token_uri: self.index_token_uri.unwrap_or(false),
        };

        IndexerConfig::new(params)
    }
}

fn validate_url(url: &str) -> Result<()> {
    if url.is_empty() {
        bail!("node_url cannot be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("node_url must start with http:// or https://");
    }
    Ok(())
}
