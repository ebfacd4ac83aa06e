//! Decoding of raw transactions into token-domain events.
//!
//! Large batches are split into contiguous chunks decoded on separate tokio
//! tasks. Each task returns its own vector and the chunks are re-joined in
//! spawn order, so the output stays in version order.

use super::events::TokenEventRecord;
use crate::types::Transaction;
use anyhow::{anyhow, Result};

/// Below this many transactions a batch is decoded inline.
const MIN_PARALLEL_BATCH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedTransaction {
    pub version: u64,
    pub timestamp: u64,
    pub sender: String,
    pub events: Vec<TokenEventRecord>,
}

/// Token events of `tx`, or `None` when it carries none.
pub fn classify_transaction(tx: &Transaction) -> Option<ClassifiedTransaction> {
    let sender = tx.sender_or_default();
    let mut events = Vec::new();

    for event in &tx.events {
        match TokenEventRecord::from_event(event, sender) {
            None => {}
            Some(Ok(record)) => events.push(record),
            Some(Err(err)) => {
                tracing::warn!(
                    version = tx.version,
                    event_key = %event.key,
                    sequence_number = event.sequence_number,
                    type_tag = %event.type_tag,
                    error = %err,
                    "skipping undecodable token event"
                );
            }
        }
    }

    if events.is_empty() {
        return None;
    }
    Some(ClassifiedTransaction {
        version: tx.version,
        timestamp: tx.timestamp,
        sender: sender.to_string(),
        events,
    })
}

fn classify_chunk(chunk: &[Transaction]) -> Vec<ClassifiedTransaction> {
    chunk.iter().filter_map(classify_transaction).collect()
}

/// Classifies `transactions` using up to `workers` decode tasks.
pub async fn classify_batch(
    transactions: &[Transaction],
    workers: usize,
) -> Result<Vec<ClassifiedTransaction>> {
    let workers = workers.max(1);
    if workers == 1 || transactions.len() < MIN_PARALLEL_BATCH {
        return Ok(classify_chunk(transactions));
    }

    let chunk_size = transactions.len().div_ceil(workers);
    let handles: Vec<_> = transactions
        .chunks(chunk_size)
        .map(|chunk| {
            let owned = chunk.to_vec();
            tokio::spawn(async move { classify_chunk(&owned) })
        })
        .collect();

    let mut classified = Vec::new();
    for (index, handle) in handles.into_iter().enumerate() {
        let part = handle
            .await
            .map_err(|err| anyhow!("token decode worker {index} failed: {err}"))?;
        classified.extend(part);
    }
    Ok(classified)
}
