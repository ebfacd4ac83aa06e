//! Drives the fetch → fan-out → checkpoint loop for every registered processor.

use super::backoff::{sleep_with_cancellation, ExponentialBackoff};
use super::fetcher::{FetchError, TransactionFetcher};
use super::handle::{HandleSettings, ProcessResult, ProcessorHandle};
use crate::checkpoint::CheckpointStore;
use crate::rpc::LedgerApi;
use crate::runtime::config::IndexerConfig;
use crate::runtime::protocol::{
    FailureKind, ProcessorError, TransactionBatch, TransactionProcessor,
};
use crate::runtime::telemetry::Telemetry;
use crate::store::{ProcessorStatus, StatusStore};
use crate::types::Transaction;
use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TailerError {
    #[error("chain id mismatch: checkpoints belong to chain {stored}, node serves chain {current}")]
    ChainMismatch { stored: u64, current: u64 },
    #[error("every processor is halted after data integrity failures: {halted:?}")]
    AllProcessorsHalted { halted: Vec<String> },
    #[error("chain id has not been verified against the checkpoint store")]
    ChainNotVerified,
}

/// What one iteration of the loop did.
#[derive(Debug)]
pub struct BatchReport {
    pub start_version: u64,
    pub end_version: u64,
    /// Transactions returned by the node, before filtering.
    pub fetched: usize,
    pub results: Vec<ProcessResult>,
}

impl BatchReport {
    fn tip(cursor: u64) -> Self {
        Self {
            start_version: cursor,
            end_version: cursor,
            fetched: 0,
            results: Vec::new(),
        }
    }

    /// The node had nothing past the cursor.
    pub fn is_tip(&self) -> bool {
        self.fetched == 0
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(ProcessResult::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ProcessorError)> {
        self.results
            .iter()
            .filter_map(|result| Some((result.name.as_str(), result.error.as_ref()?)))
    }

    pub fn has_recoverable_failure(&self) -> bool {
        self.failures().any(|(_, error)| error.is_recoverable())
    }
}

pub struct Tailer {
    fetcher: TransactionFetcher,
    checkpoints: CheckpointStore,
    statuses: Arc<dyn StatusStore>,
    processors: Vec<Arc<ProcessorHandle>>,
    halted: BTreeSet<String>,
    chain_id: Option<u64>,
    batch_size: u16,
    start_version: u64,
    fetch_timeout: Duration,
    idle_backoff: Duration,
    max_backoff: Duration,
    settings: HandleSettings,
    telemetry: Arc<Telemetry>,
}

impl Tailer {
    pub fn new(
        api: Arc<dyn LedgerApi>,
        checkpoints: CheckpointStore,
        statuses: Arc<dyn StatusStore>,
        config: &IndexerConfig,
    ) -> Self {
        Self {
            fetcher: TransactionFetcher::new(api),
            checkpoints,
            statuses,
            processors: Vec::new(),
            halted: BTreeSet::new(),
            chain_id: None,
            batch_size: config.batch_size(),
            start_version: config.start_version(),
            fetch_timeout: config.fetch_timeout(),
            idle_backoff: config.idle_backoff(),
            max_backoff: config.max_backoff(),
            settings: HandleSettings::from_config(config),
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Chain id confirmed by [`Tailer::check_or_update_chain_id`].
    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn fetcher_cursor(&self) -> Option<u64> {
        self.fetcher.cursor()
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|handle| handle.name().to_string())
            .collect()
    }

    /// Processors stopped by a data integrity failure.
    pub fn halted_processors(&self) -> Vec<String> {
        self.halted.iter().cloned().collect()
    }

    /// Registers a processor. Names key the checkpoints and must be unique.
    pub fn add_processor(&mut self, processor: Arc<dyn TransactionProcessor>) -> Result<()> {
        let name = processor.name().to_string();
        if name.is_empty() {
            bail!("processor name must not be empty");
        }
        if self.processors.iter().any(|handle| handle.name() == name) {
            bail!("processor {name} is already registered");
        }
        self.processors.push(Arc::new(ProcessorHandle::new(
            processor,
            self.checkpoints.clone(),
            self.statuses.clone(),
            self.settings,
        )));
        tracing::info!(processor = %name, "processor registered");
        Ok(())
    }

    /// Compares the node's chain id with the stored one, storing it on first run.
    pub async fn check_or_update_chain_id(&mut self) -> Result<u64> {
        let info = self
            .with_fetch_timeout("ledger info", self.fetcher.fetch_ledger_info())
            .await?;
        let current = info.chain_id;

        match self
            .checkpoints
            .ledger_info()
            .await
            .context("failed to read stored ledger info")?
        {
            Some(stored) if stored.chain_id != current => {
                return Err(TailerError::ChainMismatch {
                    stored: stored.chain_id,
                    current,
                }
                .into());
            }
            Some(_) => {}
            None => {
                self.checkpoints
                    .store_ledger_info(&info)
                    .await
                    .context("failed to store ledger info")?;
                tracing::info!(
                    chain_id = current,
                    ledger_version = info.ledger_version,
                    "recorded ledger info for a fresh checkpoint store"
                );
            }
        }

        self.chain_id = Some(current);
        Ok(current)
    }

    /// Starts the fetcher at the smallest checkpoint across processors.
    pub async fn set_fetcher_to_lowest_processor_version(&mut self) -> Result<u64> {
        let chain_id = self.verified_chain_id()?;
        let mut lowest: Option<u64> = None;

        for handle in &self.processors {
            let checkpoint = handle
                .checkpoint(chain_id)
                .await
                .with_context(|| format!("failed to read checkpoint of {}", handle.name()))?;
            let resume = checkpoint.unwrap_or(self.start_version);
            tracing::debug!(processor = %handle.name(), ?checkpoint, resume, "processor resume point");
            lowest = Some(lowest.map_or(resume, |current| current.min(resume)));
        }

        let start = lowest.unwrap_or(self.start_version);
        // A restarted run repositions a cursor left over from the previous one.
        match self.fetcher.cursor() {
            None => self.fetcher.set_start_version(start)?,
            Some(_) => self.fetcher.rewind_to(start)?,
        }
        tracing::info!(chain_id, start_version = start, "fetcher positioned");
        Ok(start)
    }

    /// Fetches the next batch and hands it to every active processor.
    pub async fn process_next_batch(&mut self, cancel: &CancellationToken) -> Result<BatchReport> {
        let cursor = self.fetcher.cursor().ok_or(FetchError::NotStarted)?;
        let batch_size = self.batch_size;
        let fetch_timeout = self.fetch_timeout;
        let transactions = match tokio::time::timeout(
            fetch_timeout,
            self.fetcher.fetch_next_batch(batch_size),
        )
        .await
        {
            Ok(fetched) => fetched?,
            Err(_) => {
                return Err(FetchError::UpstreamUnavailable {
                    error: anyhow!("transactions request exceeded {fetch_timeout:?}"),
                }
                .into())
            }
        };

        if transactions.is_empty() {
            return Ok(BatchReport::tip(cursor));
        }
        self.telemetry.record_fetched(transactions.len() as u64);
        self.process_transactions(transactions, cancel).await
    }

    /// Fetches a single version and runs it through every active processor.
    pub async fn process_version(
        &mut self,
        version: u64,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let tx = self
            .with_fetch_timeout("transaction", self.fetcher.fetch_version(version))
            .await?;
        self.process_transactions(vec![tx], cancel).await
    }

    /// Runs `transactions` through every processor that is not halted and
    /// waits for all of them.
    pub async fn process_transactions(
        &mut self,
        transactions: Vec<Transaction>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let chain_id = self.verified_chain_id()?;
        let (Some(first), Some(last)) = (transactions.first(), transactions.last()) else {
            bail!("cannot process an empty transaction list");
        };
        let (start_version, end_version) = (first.version, last.version);
        let fetched = transactions.len();

        let eligible: Vec<Transaction> = transactions
            .into_iter()
            .filter(Transaction::is_indexable)
            .collect();
        let batch = Arc::new(TransactionBatch::new(
            chain_id,
            start_version,
            end_version,
            eligible,
        ));

        let active: Vec<Arc<ProcessorHandle>> = self
            .processors
            .iter()
            .filter(|handle| !self.halted.contains(handle.name()))
            .cloned()
            .collect();

        let tasks = active.iter().map(|handle| {
            let handle = handle.clone();
            let batch = batch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handle.process_batch(&batch, &cancel).await })
        });
        let joined = join_all(tasks).await;

        let results: Vec<ProcessResult> = joined
            .into_iter()
            .zip(&active)
            .map(|(joined, handle)| {
                joined.unwrap_or_else(|err| {
                    let error = ProcessorError::new(
                        FailureKind::Panicked,
                        anyhow!("processor task failed: {err}"),
                    );
                    ProcessResult::failed(handle.name(), &batch, error)
                })
            })
            .collect();

        for (name, error) in results
            .iter()
            .filter_map(|r| Some((r.name.as_str(), r.error.as_ref()?)))
        {
            if error.kind() == FailureKind::DataIntegrity && self.halted.insert(name.to_string()) {
                tracing::error!(
                    processor = %name,
                    start_version,
                    end_version,
                    error = %error,
                    "data integrity failure; processor halted"
                );
            }
        }

        Ok(BatchReport {
            start_version,
            end_version,
            fetched,
            results,
        })
    }

    /// Failed or unfinished status rows of `processor`.
    pub async fn error_versions(&self, processor: &str) -> Result<Vec<ProcessorStatus>> {
        let handle = self
            .processors
            .iter()
            .find(|handle| handle.name() == processor)
            .with_context(|| format!("processor {processor} is not registered"))?;
        handle.error_versions().await
    }

    /// Startup guard, resume, then the tailing loop until `shutdown` fires.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        if self.processors.is_empty() {
            bail!("at least one processor must be registered");
        }
        self.check_or_update_chain_id().await?;
        self.set_fetcher_to_lowest_processor_version().await?;

        let mut backoff = ExponentialBackoff::new(self.idle_backoff, self.max_backoff);

        while !shutdown.is_cancelled() {
            let report = match self.process_next_batch(&shutdown).await {
                Ok(report) => report,
                Err(err) => {
                    let transient = err
                        .downcast_ref::<FetchError>()
                        .is_some_and(FetchError::is_transient);
                    if !transient {
                        return Err(err);
                    }
                    self.telemetry.record_fetch_failure();
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        cursor = ?self.fetcher.cursor(),
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{err:#}"),
                        "fetch failed; backing off"
                    );
                    if sleep_with_cancellation(delay, Some(&shutdown)).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if report.is_tip() {
                if sleep_with_cancellation(self.idle_backoff, Some(&shutdown))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }

            if self.halted.len() == self.processors.len() {
                return Err(TailerError::AllProcessorsHalted {
                    halted: self.halted_processors(),
                }
                .into());
            }

            if report.has_recoverable_failure() {
                if shutdown.is_cancelled() {
                    break;
                }
                self.telemetry.record_processor_failure();
                self.fetcher.rewind_to(report.start_version)?;
                let delay = backoff.next_delay();
                for (name, error) in report.failures() {
                    tracing::warn!(
                        processor = %name,
                        start_version = report.start_version,
                        end_version = report.end_version,
                        kind = ?error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "batch will be replayed"
                    );
                }
                if sleep_with_cancellation(delay, Some(&shutdown)).await.is_err() {
                    break;
                }
                continue;
            }

            backoff.reset();
            let processed = report
                .results
                .iter()
                .map(|result| result.summary.transactions as u64)
                .max()
                .unwrap_or_default();
            self.telemetry.record_batch(processed, report.end_version);
            tracing::debug!(
                start_version = report.start_version,
                end_version = report.end_version,
                fetched = report.fetched,
                "batch retired by all processors"
            );
        }

        tracing::info!(cursor = ?self.fetcher.cursor(), "tailer stopped");
        Ok(())
    }

    fn verified_chain_id(&self) -> Result<u64> {
        self.chain_id
            .ok_or_else(|| TailerError::ChainNotVerified.into())
    }

    async fn with_fetch_timeout<T>(
        &self,
        what: &str,
        request: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(FetchError::UpstreamUnavailable {
                error: anyhow!("{what} request exceeded {:?}", self.fetch_timeout),
            }
            .into()),
        }
    }
}
