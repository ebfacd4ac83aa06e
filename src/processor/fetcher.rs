//! Cursor over the ledger's transaction stream.

use crate::rpc::{LedgerApi, LedgerApiError};
use crate::types::{LedgerInfo, Transaction};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("ledger node unavailable: {error:#}")]
    UpstreamUnavailable { error: anyhow::Error },
    #[error("version {version} has not been produced yet")]
    NotFound { version: u64 },
    #[error("fetcher already started at version {current}")]
    AlreadyStarted { current: u64 },
    #[error("fetcher has no start version")]
    NotStarted,
    #[error("node returned version {actual} where {expected} was expected")]
    Inconsistent { expected: u64, actual: u64 },
}

impl FetchError {
    /// Errors that may clear up by themselves on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::UpstreamUnavailable { .. } | FetchError::Inconsistent { .. }
        )
    }

    fn upstream(error: anyhow::Error) -> Self {
        FetchError::UpstreamUnavailable { error }
    }
}

pub struct TransactionFetcher {
    api: Arc<dyn LedgerApi>,
    cursor: Option<u64>,
}

impl TransactionFetcher {
    pub fn new(api: Arc<dyn LedgerApi>) -> Self {
        Self { api, cursor: None }
    }

    /// Next version `fetch_next_batch` will request.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// One-time initialization of the cursor.
    pub fn set_start_version(&mut self, version: u64) -> Result<(), FetchError> {
        if let Some(current) = self.cursor {
            return Err(FetchError::AlreadyStarted { current });
        }
        self.cursor = Some(version);
        Ok(())
    }

    /// Moves the cursor back so a failed batch is fetched again.
    pub fn rewind_to(&mut self, version: u64) -> Result<(), FetchError> {
        if self.cursor.is_none() {
            return Err(FetchError::NotStarted);
        }
        self.cursor = Some(version);
        Ok(())
    }

    /// Up to `count` transactions from the cursor. Empty means the tip was reached.
    ///
    /// The cursor only moves when the node returned a contiguous run.
    pub async fn fetch_next_batch(&mut self, count: u16) -> Result<Vec<Transaction>, FetchError> {
        let start = self.cursor.ok_or(FetchError::NotStarted)?;
        let transactions = self
            .api
            .transactions(start, count.max(1))
            .await
            .map_err(FetchError::upstream)?;

        for (offset, tx) in transactions.iter().enumerate() {
            let expected = start + offset as u64;
            if tx.version != expected {
                return Err(FetchError::Inconsistent {
                    expected,
                    actual: tx.version,
                });
            }
        }

        self.cursor = Some(start + transactions.len() as u64);
        Ok(transactions)
    }

    pub async fn fetch_version(&self, version: u64) -> Result<Transaction, FetchError> {
        self.api
            .transaction_by_version(version)
            .await
            .map_err(|err| {
                let missing = matches!(
                    err.downcast_ref::<LedgerApiError>(),
                    Some(LedgerApiError::NotFound { .. })
                );
                if missing {
                    FetchError::NotFound { version }
                } else {
                    FetchError::upstream(err)
                }
            })
    }

    pub async fn fetch_ledger_info(&self) -> Result<LedgerInfo, FetchError> {
        self.api.ledger_info().await.map_err(FetchError::upstream)
    }
}
