pub mod checkpoint;
pub mod module;
pub mod processor;
pub mod rpc;
pub mod runtime;
pub mod store;
pub mod token;
pub mod types;

pub use checkpoint::{CheckpointCache, CheckpointStore, FjallCheckpointCache, MemoryCheckpointCache};
pub use module::{ModuleProcessor, MODULE_PROCESSOR_NAME};
pub use processor::{
    BatchReport, FetchError, HandleSettings, ProcessResult, ProcessorHandle, Tailer, TailerError,
    TransactionFetcher,
};
pub use rpc::{LedgerApi, LedgerApiError, LedgerAuth, LedgerClient, LedgerClientOptions};
pub use runtime::config::{IndexerConfig, IndexerConfigBuilder, IndexerConfigParams};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::protocol::{
    BatchContext, FailureKind, ProcessSummary, ProcessorError, ProcessorFuture, TransactionBatch,
    TransactionProcessor,
};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{MemoryStore, ModuleStore, StatusStore, TokenStore};
pub use token::{ReconcileError, TokenProcessor, TokenReconciler, TOKEN_PROCESSOR_NAME};
pub use types::{Event, LedgerInfo, Transaction, TransactionKind};
