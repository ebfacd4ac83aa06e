use super::aggregate::BatchAggregate;
use super::classify::classify_batch;
use super::metadata::{classify_uri, HttpMetadataFetcher, MetadataFetcher};
use super::reconciler::TokenReconciler;
use crate::runtime::config::IndexerConfig;
use crate::runtime::protocol::{
    BatchContext, FailureKind, ProcessSummary, ProcessorError, ProcessorFuture, TransactionBatch,
    TransactionProcessor,
};
use crate::store::{TokenDataRecord, TokenMetadataRecord, TokenStore};
use anyhow::{anyhow, Result};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const TOKEN_PROCESSOR_NAME: &str = "token_processor";

/// Derives collections, token data, balances and pending offers from token events.
pub struct TokenProcessor {
    store: Arc<dyn TokenStore>,
    reconciler: TokenReconciler,
    decode_workers: usize,
    metadata: Option<Arc<dyn MetadataFetcher>>,
}

impl TokenProcessor {
    pub fn new(store: Arc<dyn TokenStore>, decode_workers: usize) -> Self {
        Self {
            reconciler: TokenReconciler::new(store.clone()),
            store,
            decode_workers: decode_workers.max(1),
            metadata: None,
        }
    }

    /// Builds the processor, with an HTTP metadata fetcher when `index_token_uri` is set.
    pub fn from_config(store: Arc<dyn TokenStore>, config: &IndexerConfig) -> Result<Self> {
        let processor = Self::new(store, config.decode_workers());
        if !config.index_token_uri() {
            return Ok(processor);
        }
        let fetcher = HttpMetadataFetcher::new(config.fetch_timeout())?;
        Ok(processor.with_metadata_fetcher(Arc::new(fetcher)))
    }

    pub fn with_metadata_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.metadata = Some(fetcher);
        self
    }

    async fn process_batch(
        &self,
        batch: &TransactionBatch,
        ctx: &BatchContext,
    ) -> Result<ProcessSummary, ProcessorError> {
        let classified = classify_batch(batch.transactions(), self.decode_workers)
            .await
            .map_err(|err| ProcessorError::new(FailureKind::Transform, err))?;

        let aggregate = BatchAggregate::from_classified(&classified);
        if aggregate.is_empty() {
            return Ok(ProcessSummary {
                transactions: batch.len(),
                records_written: 0,
            });
        }
        let created: BTreeSet<String> = aggregate.token_datas.keys().cloned().collect();

        let changeset = self
            .reconciler
            .reconcile(aggregate)
            .await
            .map_err(ProcessorError::from_transform)?;

        if ctx.is_cancelled() {
            return Err(ProcessorError::new(
                FailureKind::Cancelled,
                anyhow!(
                    "cancelled before persisting versions {}..={}",
                    batch.start_version(),
                    batch.end_version()
                ),
            ));
        }

        let fresh_token_datas: Vec<TokenDataRecord> = changeset
            .token_datas
            .iter()
            .filter(|row| created.contains(&row.token_data_id) && !row.uri.is_empty())
            .cloned()
            .collect();

        let records_written = self
            .reconciler
            .persist(changeset)
            .await
            .map_err(|err| ProcessorError::new(FailureKind::Transform, err))?;

        let enriched = self.enrich_metadata(&fresh_token_datas).await;

        tracing::debug!(
            processor = TOKEN_PROCESSOR_NAME,
            start_version = batch.start_version(),
            end_version = batch.end_version(),
            token_transactions = classified.len(),
            records_written,
            enriched,
            "token batch reconciled"
        );

        Ok(ProcessSummary {
            transactions: batch.len(),
            records_written: records_written + enriched,
        })
    }

    /// Best effort: failures are logged and skipped.
    async fn enrich_metadata(&self, token_datas: &[TokenDataRecord]) -> usize {
        let Some(fetcher) = &self.metadata else {
            return 0;
        };
        if token_datas.is_empty() {
            return 0;
        }

        let fetched = join_all(token_datas.iter().map(|row| async move {
            let metadata = fetcher.fetch(&row.uri).await?;
            Some(TokenMetadataRecord {
                token_data_id: row.token_data_id.clone(),
                uri: row.uri.clone(),
                source: classify_uri(&row.uri),
                metadata,
                version: row.version,
            })
        }))
        .await;
        let rows: Vec<TokenMetadataRecord> = fetched.into_iter().flatten().collect();
        let count = rows.len();

        match self.store.upsert_token_metadata(rows).await {
            Ok(()) => count,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "failed to persist token metadata");
                0
            }
        }
    }
}

impl TransactionProcessor for TokenProcessor {
    fn name(&self) -> &str {
        TOKEN_PROCESSOR_NAME
    }

    fn process<'a>(
        &'a self,
        batch: &'a TransactionBatch,
        ctx: &'a BatchContext,
    ) -> ProcessorFuture<'a> {
        Box::pin(self.process_batch(batch, ctx))
    }
}
