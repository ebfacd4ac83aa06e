use crate::token::reconciler::ReconcileError;
use crate::types::Transaction;
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type ProcessorFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProcessSummary, ProcessorError>> + Send + 'a>>;

/// How a batch failed. Everything except `DataIntegrity` is eligible for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transform,
    DataIntegrity,
    Timeout,
    Cancelled,
    Panicked,
    CheckpointIo,
}

/// Error surfaced by a processor for one batch.
#[derive(Debug)]
pub struct ProcessorError {
    kind: FailureKind,
    source: AnyError,
}

impl ProcessorError {
    pub fn new(kind: FailureKind, source: AnyError) -> Self {
        Self { kind, source }
    }

    /// Classifies an arbitrary error: reconciliation faults are data-integrity
    /// failures, everything else is a recoverable transform failure.
    pub fn from_transform(source: AnyError) -> Self {
        let kind = if source.downcast_ref::<ReconcileError>().is_some() {
            FailureKind::DataIntegrity
        } else {
            FailureKind::Transform
        };
        Self { kind, source }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind != FailureKind::DataIntegrity
    }

    pub fn source_error(&self) -> &AnyError {
        &self.source
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl From<ReconcileError> for ProcessorError {
    fn from(err: ReconcileError) -> Self {
        Self::new(FailureKind::DataIntegrity, err.into())
    }
}

impl core::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} processor error: {:#}", self.kind, self.source)
    }
}

impl std::error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// One batch of eligible transactions handed to every processor.
#[derive(Debug, Clone)]
pub struct TransactionBatch {
    chain_id: u64,
    start_version: u64,
    end_version: u64,
    transactions: Vec<Transaction>,
}

impl TransactionBatch {
    /// `start_version`/`end_version` describe the fetched range, which can be wider than
    /// the retained transactions once failed or non-user transactions are filtered out.
    pub fn new(
        chain_id: u64,
        start_version: u64,
        end_version: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            chain_id,
            start_version,
            end_version,
            transactions,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn start_version(&self) -> u64 {
        self.start_version
    }

    pub fn end_version(&self) -> u64 {
        self.end_version
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Copy of this batch without the versions at or below `checkpoint`.
    pub fn after(&self, checkpoint: u64) -> Option<Self> {
        if self.end_version <= checkpoint {
            return None;
        }
        Some(Self {
            chain_id: self.chain_id,
            start_version: self.start_version.max(checkpoint.saturating_add(1)),
            end_version: self.end_version,
            transactions: self
                .transactions
                .iter()
                .filter(|tx| tx.version > checkpoint)
                .cloned()
                .collect(),
        })
    }
}

/// What a processor reports back after retiring a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub transactions: usize,
    pub records_written: usize,
}

/// Per-invocation context: the cancellation scope for this batch.
#[derive(Debug, Clone)]
pub struct BatchContext {
    cancel: CancellationToken,
}

impl BatchContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Trait implemented by the consumers that derive state from ledger transactions.
///
/// Checkpoints and status records are handled by the framework around the
/// processor, so implementations only transform batches.
pub trait TransactionProcessor: Send + Sync + 'static {
    /// Stable name used for checkpoint keys and status rows.
    fn name(&self) -> &str;

    /// Transforms one batch. Must not persist partial results on error.
    fn process<'a>(&'a self, batch: &'a TransactionBatch, ctx: &'a BatchContext)
        -> ProcessorFuture<'a>;
}
