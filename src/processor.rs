//! Processor orchestration: the ledger cursor, the per-processor framework
//! wrapper, and the tailing loop that fans batches out.

pub mod backoff;
pub mod fetcher;
pub mod handle;
pub mod tailer;

pub use fetcher::{FetchError, TransactionFetcher};
pub use handle::{HandleSettings, ProcessResult, ProcessorHandle};
pub use tailer::{BatchReport, Tailer, TailerError};
