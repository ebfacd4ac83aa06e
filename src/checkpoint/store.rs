use super::cache::CheckpointCache;
use crate::types::LedgerInfo;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Cache key holding the JSON-encoded [`LedgerInfo`] of the indexed chain.
pub const LEDGER_INFO_KEY: &str = "ledger_info";

pub fn checkpoint_key(processor: &str, chain_id: u64) -> String {
    format!("processor:{processor};chain_id_{chain_id};max_version")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointAdvance {
    Advanced { previous: Option<u64>, current: u64 },
    Unchanged { current: u64 },
}

/// Typed view over a [`CheckpointCache`].
///
/// The tailer is the only writer per processor name, so a plain get-then-set
/// is enough to keep checkpoints monotonic.
#[derive(Clone)]
pub struct CheckpointStore {
    cache: Arc<dyn CheckpointCache>,
}

impl CheckpointStore {
    pub fn new(cache: Arc<dyn CheckpointCache>) -> Self {
        Self { cache }
    }

    pub async fn ledger_info(&self) -> Result<Option<LedgerInfo>> {
        let Some(raw) = self.cache.get(LEDGER_INFO_KEY).await? else {
            return Ok(None);
        };
        let info = LedgerInfo::from_json(&raw).context("stored ledger_info is not valid JSON")?;
        Ok(Some(info))
    }

    pub async fn store_ledger_info(&self, info: &LedgerInfo) -> Result<()> {
        let raw = info.to_json().context("failed to encode ledger_info")?;
        self.cache.set(LEDGER_INFO_KEY, raw).await
    }

    /// Highest version `processor` has completed on `chain_id`, if any.
    pub async fn checkpoint(&self, processor: &str, chain_id: u64) -> Result<Option<u64>> {
        let key = checkpoint_key(processor, chain_id);
        let Some(raw) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        let version = raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("checkpoint {key} holds a non-numeric value {raw:?}"))?;
        Ok(Some(version))
    }

    /// Moves the checkpoint to `max(current, version)`. Regressions are ignored.
    pub async fn advance(
        &self,
        processor: &str,
        chain_id: u64,
        version: u64,
    ) -> Result<CheckpointAdvance> {
        let previous = self.checkpoint(processor, chain_id).await?;
        if let Some(current) = previous {
            if version <= current {
                return Ok(CheckpointAdvance::Unchanged { current });
            }
        }

        let key = checkpoint_key(processor, chain_id);
        self.cache.set(&key, version.to_string()).await?;
        tracing::debug!(
            processor,
            chain_id,
            previous = ?previous,
            current = version,
            "checkpoint advanced"
        );
        Ok(CheckpointAdvance::Advanced {
            previous,
            current: version,
        })
    }
}
