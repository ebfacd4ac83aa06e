//! Framework wrapper that runs one processor over one batch: checkpoint
//! trimming, status bookkeeping, timeout, panic isolation, and checkpoint
//! advance.

use super::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::checkpoint::CheckpointStore;
use crate::runtime::config::IndexerConfig;
use crate::runtime::protocol::{
    BatchContext, FailureKind, ProcessSummary, ProcessorError, TransactionBatch,
    TransactionProcessor,
};
use crate::store::{ProcessorStatus, StatusStore};
use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSettings {
    pub timeout: Duration,
    pub checkpoint_retry_attempts: usize,
    pub checkpoint_retry_initial: Duration,
    pub checkpoint_retry_max: Duration,
}

impl Default for HandleSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            checkpoint_retry_attempts: 5,
            checkpoint_retry_initial: Duration::from_millis(50),
            checkpoint_retry_max: Duration::from_secs(2),
        }
    }
}

impl HandleSettings {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            timeout: config.processor_timeout(),
            checkpoint_retry_attempts: config.checkpoint_retry_attempts(),
            checkpoint_retry_initial: config.idle_backoff().min(Duration::from_millis(250)),
            checkpoint_retry_max: config.max_backoff(),
        }
    }
}

/// Outcome of one processor over one batch.
#[derive(Debug)]
pub struct ProcessResult {
    pub name: String,
    pub start_version: u64,
    pub end_version: u64,
    pub error: Option<ProcessorError>,
    /// The processor's checkpoint already covered the whole batch.
    pub skipped: bool,
    pub summary: ProcessSummary,
}

impl ProcessResult {
    fn new(name: &str, batch: &TransactionBatch) -> Self {
        Self {
            name: name.to_string(),
            start_version: batch.start_version(),
            end_version: batch.end_version(),
            error: None,
            skipped: false,
            summary: ProcessSummary::default(),
        }
    }

    pub(crate) fn failed(name: &str, batch: &TransactionBatch, error: ProcessorError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(name, batch)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(ProcessorError::kind)
    }
}

pub struct ProcessorHandle {
    processor: Arc<dyn TransactionProcessor>,
    checkpoints: CheckpointStore,
    statuses: Arc<dyn StatusStore>,
    settings: HandleSettings,
}

impl ProcessorHandle {
    pub fn new(
        processor: Arc<dyn TransactionProcessor>,
        checkpoints: CheckpointStore,
        statuses: Arc<dyn StatusStore>,
        settings: HandleSettings,
    ) -> Self {
        Self {
            processor,
            checkpoints,
            statuses,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        self.processor.name()
    }

    pub async fn checkpoint(&self, chain_id: u64) -> anyhow::Result<Option<u64>> {
        self.checkpoints.checkpoint(self.name(), chain_id).await
    }

    /// Status rows of this processor that never reached success.
    pub async fn error_versions(&self) -> anyhow::Result<Vec<ProcessorStatus>> {
        self.statuses.failed_statuses(self.name()).await
    }

    pub async fn process_batch(
        &self,
        batch: &TransactionBatch,
        cancel: &CancellationToken,
    ) -> ProcessResult {
        let name = self.name();

        let checkpoint = match self.checkpoint(batch.chain_id()).await {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                let error = ProcessorError::new(
                    FailureKind::CheckpointIo,
                    err.context("failed to read checkpoint"),
                );
                return ProcessResult::failed(name, batch, error);
            }
        };

        let trimmed;
        let batch = match checkpoint {
            None => batch,
            Some(checkpoint) => match batch.after(checkpoint) {
                Some(rest) => {
                    trimmed = rest;
                    &trimmed
                }
                None => {
                    tracing::debug!(
                        processor = %name,
                        start_version = batch.start_version(),
                        end_version = batch.end_version(),
                        checkpoint,
                        "batch already covered by checkpoint"
                    );
                    return ProcessResult {
                        skipped: true,
                        ..ProcessResult::new(name, batch)
                    };
                }
            },
        };

        if let Err(err) = self.write_status(batch, false, None).await {
            let error = ProcessorError::new(
                FailureKind::Transform,
                err.context("failed to mark batch as started"),
            );
            return ProcessResult::failed(name, batch, error);
        }

        match self.run_processor(batch, cancel).await {
            Ok(summary) => self.complete(batch, summary, cancel).await,
            Err(error) => {
                tracing::warn!(
                    processor = %name,
                    start_version = batch.start_version(),
                    end_version = batch.end_version(),
                    kind = ?error.kind(),
                    error = %error,
                    "batch failed"
                );
                let detail = error.to_string();
                if let Err(err) = self.write_status(batch, false, Some(detail)).await {
                    tracing::warn!(
                        processor = %name,
                        error = %format!("{err:#}"),
                        "failed to record batch failure"
                    );
                }
                ProcessResult::failed(name, batch, error)
            }
        }
    }

    async fn run_processor(
        &self,
        batch: &TransactionBatch,
        cancel: &CancellationToken,
    ) -> Result<ProcessSummary, ProcessorError> {
        let ctx = BatchContext::new(cancel.child_token());
        let work = AssertUnwindSafe(self.processor.process(batch, &ctx)).catch_unwind();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProcessorError::new(
                FailureKind::Cancelled,
                anyhow!("shutdown requested during processing"),
            )),
            outcome = tokio::time::timeout(self.settings.timeout, work) => match outcome {
                Err(_) => Err(ProcessorError::new(
                    FailureKind::Timeout,
                    anyhow!("processing exceeded {:?}", self.settings.timeout),
                )),
                Ok(Err(panic)) => Err(ProcessorError::new(
                    FailureKind::Panicked,
                    anyhow!("processor panicked: {}", panic_message(panic.as_ref())),
                )),
                Ok(Ok(result)) => result,
            },
        }
    }

    async fn complete(
        &self,
        batch: &TransactionBatch,
        summary: ProcessSummary,
        cancel: &CancellationToken,
    ) -> ProcessResult {
        let name = self.name();
        let retry = RetryBackoff::new(
            self.settings.checkpoint_retry_initial,
            self.settings.checkpoint_retry_max,
        )
        .with_max_attempts(self.settings.checkpoint_retry_attempts)
        .with_cancellation(cancel);

        let advanced = retry_with_backoff(
            retry,
            |_| {
                self.checkpoints
                    .advance(name, batch.chain_id(), batch.end_version())
            },
            |attempt, delay, err, will_retry| {
                tracing::warn!(
                    processor = %name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    will_retry,
                    error = %format!("{err:#}"),
                    "checkpoint write failed"
                );
            },
            |_, _| RetryDisposition::Retry,
        )
        .await;

        if let Err(err) = advanced {
            let error = ProcessorError::new(
                FailureKind::CheckpointIo,
                err.context(format!(
                    "failed to advance checkpoint to {}",
                    batch.end_version()
                )),
            );
            return ProcessResult::failed(name, batch, error);
        }

        if let Err(err) = self.write_status(batch, true, None).await {
            tracing::warn!(
                processor = %name,
                end_version = batch.end_version(),
                error = %format!("{err:#}"),
                "checkpoint advanced but success status was not recorded"
            );
        }

        tracing::debug!(
            processor = %name,
            start_version = batch.start_version(),
            end_version = batch.end_version(),
            transactions = summary.transactions,
            records_written = summary.records_written,
            "batch retired"
        );

        ProcessResult {
            summary,
            ..ProcessResult::new(name, batch)
        }
    }

    async fn write_status(
        &self,
        batch: &TransactionBatch,
        success: bool,
        detail: Option<String>,
    ) -> anyhow::Result<()> {
        self.statuses
            .upsert_status(ProcessorStatus {
                name: self.name().to_string(),
                start_version: batch.start_version(),
                end_version: batch.end_version(),
                success,
                detail,
                updated_at: unix_now(),
            })
            .await
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
