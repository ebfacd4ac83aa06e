use std::sync::Arc;

use crate::support::{
    helpers::{
        addr, event, init_tracing, test_config, token_data_id,
        token_events::{self as ev},
        token_id, user_tx, Harness, CHAIN_ID,
    },
    mock_node::MockLedger,
};
use anyhow::{Context, Result};
use ledgerscan::store::{OwnershipRecord, PendingTransferRecord};
use ledgerscan::token::{pending_id, TokenDataId, TokenId};
use ledgerscan::{
    CheckpointStore, FailureKind, MemoryCheckpointCache, Tailer, TokenProcessor,
    TOKEN_PROCESSOR_NAME,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn hashed(id: &Value) -> Result<(String, String)> {
    let token: TokenId = serde_json::from_value(id.clone())?;
    Ok((token.hash_id(), token.token_data_id.hash_id()))
}

fn token_only_tailer(harness: &Harness, checkpoints: CheckpointStore, start: u64) -> Result<Tailer> {
    let config = test_config(harness.url(), 50, start)?;
    let mut tailer = Tailer::new(
        Arc::new(harness.client()?),
        checkpoints,
        harness.store.clone(),
        &config,
    );
    tailer.add_processor(Arc::new(TokenProcessor::new(harness.store.clone(), 2)))?;
    Ok(tailer)
}

async fn positioned(mut tailer: Tailer) -> Result<Tailer> {
    tailer.check_or_update_chain_id().await?;
    tailer.set_fetcher_to_lowest_processor_version().await?;
    Ok(tailer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn net_ownership_delta_lands_once_at_highest_version() -> Result<()> {
    init_tracing();
    let alice = addr(0xa);
    let token = token_id(&token_data_id(&addr(1), "Aptos Zero", "Zero #3"), 0);
    let (token_hash, data_hash) = hashed(&token)?;

    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(45);
    ledger.push(user_tx(&alice, vec![event(&alice, 6, 0, ev::WITHDRAW, ev::amount(&token, 30))]));
    ledger.push_empty(4);
    ledger.push(user_tx(&alice, vec![event(&alice, 5, 0, ev::DEPOSIT, ev::amount(&token, 10))]));
    let harness = Harness::start(ledger).await?;
    harness.store.seed_ownership(OwnershipRecord {
        token_id: token_hash.clone(),
        token_data_id: data_hash,
        owner: alice.clone(),
        amount: 100,
        version: 40,
    });

    let mut tailer = positioned(token_only_tailer(&harness, harness.checkpoints.clone(), 41)?).await?;
    let report = tailer.process_next_batch(&CancellationToken::new()).await?;
    assert_eq!((report.start_version, report.end_version), (41, 50));
    assert!(report.is_success());

    let row = harness.store.ownership(&token_hash, &alice).context("alice row")?;
    assert_eq!((row.amount, row.version), (80, 50));

    // A second pass over the same versions must not apply the delta again.
    let fresh = CheckpointStore::new(Arc::new(MemoryCheckpointCache::new()));
    let mut replay = positioned(token_only_tailer(&harness, fresh, 41)?).await?;
    let report = replay.process_next_batch(&CancellationToken::new()).await?;
    assert!(report.is_success());
    let row = harness.store.ownership(&token_hash, &alice).context("alice row")?;
    assert_eq!((row.amount, row.version), (80, 50));

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partial_cancel_reduces_pending_amount() -> Result<()> {
    init_tracing();
    let (bob, carol) = (addr(2), addr(3));
    let token = token_id(&token_data_id(&addr(1), "Aptos Zero", "Zero #4"), 0);
    let (token_hash, _) = hashed(&token)?;

    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push(user_tx(&bob, vec![event(&bob, 7, 0, ev::OFFER, ev::offer(&carol, &token, 3))]));
    ledger.push(user_tx(&bob, vec![event(&bob, 9, 0, ev::CANCEL_OFFER, ev::offer(&carol, &token, 1))]));
    let harness = Harness::start(ledger).await?;

    let mut tailer = positioned(token_only_tailer(&harness, harness.checkpoints.clone(), 0)?).await?;
    assert!(tailer
        .process_next_batch(&CancellationToken::new())
        .await?
        .is_success());

    let pending = harness
        .store
        .pending_transfer(&pending_id(&token_hash, &bob, &carol))
        .context("pending row")?;
    assert_eq!((pending.amount, pending.version), (2, 1));

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn claim_exceeding_offer_halts_with_negative_transfer() -> Result<()> {
    init_tracing();
    let (bob, carol) = (addr(2), addr(3));
    let token = token_id(&token_data_id(&addr(1), "Aptos Zero", "Zero #5"), 0);
    let (token_hash, _) = hashed(&token)?;
    let id = pending_id(&token_hash, &bob, &carol);

    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(11);
    ledger.push(user_tx(&carol, vec![event(&bob, 8, 0, ev::CLAIM, ev::offer(&carol, &token, 2))]));
    let harness = Harness::start(ledger).await?;
    let seeded = PendingTransferRecord {
        pending_id: id.clone(),
        token_id: token_hash,
        from: bob,
        to: carol,
        amount: 1,
        version: 10,
        timestamp: 0,
    };
    harness.store.seed_pending_transfer(seeded.clone());

    let mut tailer = positioned(token_only_tailer(&harness, harness.checkpoints.clone(), 11)?).await?;
    let report = tailer.process_next_batch(&CancellationToken::new()).await?;

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.kind(), FailureKind::DataIntegrity);
    assert!(format!("{}", failures[0].1).contains("would be -1"));
    assert_eq!(tailer.halted_processors(), vec![TOKEN_PROCESSOR_NAME.to_string()]);
    assert_eq!(harness.store.pending_transfer(&id), Some(seeded));
    assert_eq!(
        harness.checkpoints.checkpoint(TOKEN_PROCESSOR_NAME, CHAIN_ID).await?,
        None
    );

    // Halted processors are skipped from then on.
    let report = tailer.process_version(11, &CancellationToken::new()).await?;
    assert!(report.results.is_empty());

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn property_mutation_moves_balances_to_new_token_id() -> Result<()> {
    init_tracing();
    let (creator, alice) = (addr(1), addr(0xa));
    let data_id = token_data_id(&creator, "Aptos Zero", "Zero #6");
    let old_token = token_id(&data_id, 0);
    let new_token = token_id(&data_id, 1);
    let (old_hash, data_hash) = hashed(&old_token)?;
    let (new_hash, _) = hashed(&new_token)?;
    assert_eq!(
        serde_json::from_value::<TokenDataId>(data_id.clone())?.hash_id(),
        data_hash
    );

    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(6);
    ledger.push(user_tx(
        &creator,
        vec![event(
            &creator,
            11,
            0,
            "0x3::token::MutateTokenPropertyMapEvent",
            json!({
                "old_id": old_token,
                "new_id": new_token,
                "keys": ["level"],
                "values": ["0x02"],
                "types": ["u8"],
            }),
        )],
    ));
    let harness = Harness::start(ledger).await?;
    harness.store.seed_ownership(OwnershipRecord {
        token_id: old_hash.clone(),
        token_data_id: data_hash.clone(),
        owner: alice.clone(),
        amount: 1,
        version: 5,
    });

    let mut tailer = positioned(token_only_tailer(&harness, harness.checkpoints.clone(), 6)?).await?;
    assert!(tailer
        .process_next_batch(&CancellationToken::new())
        .await?
        .is_success());

    let old = harness.store.ownership(&old_hash, &alice).context("old row")?;
    assert_eq!((old.amount, old.version), (0, 6));
    let new = harness.store.ownership(&new_hash, &alice).context("new row")?;
    assert_eq!((new.amount, new.version, new.token_data_id), (1, 6, data_hash));

    let properties = harness.store.token_properties();
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].previous_token_id, old_hash);
    assert_eq!(properties[0].keys, vec!["level".to_string()]);

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn renamed_token_transferred_within_one_batch() -> Result<()> {
    init_tracing();
    let (creator, alice, bob) = (addr(1), addr(0xa), addr(0xb));
    let data_id = token_data_id(&creator, "Aptos Zero", "Zero #7");
    let old_token = token_id(&data_id, 0);
    let new_token = token_id(&data_id, 1);
    let (old_hash, data_hash) = hashed(&old_token)?;
    let (new_hash, _) = hashed(&new_token)?;

    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(12);
    ledger.push(user_tx(
        &creator,
        vec![event(
            &creator,
            11,
            0,
            "0x3::token::MutateTokenPropertyMapEvent",
            json!({
                "old_id": old_token,
                "new_id": new_token,
                "keys": ["level"],
                "values": ["0x03"],
                "types": ["u8"],
            }),
        )],
    ));
    ledger.push_empty(1);
    ledger.push(user_tx(
        &alice,
        vec![
            event(&alice, 6, 0, ev::WITHDRAW, ev::amount(&new_token, 1)),
            event(&bob, 5, 0, ev::DEPOSIT, ev::amount(&new_token, 1)),
        ],
    ));
    let harness = Harness::start(ledger).await?;
    harness.store.seed_ownership(OwnershipRecord {
        token_id: old_hash.clone(),
        token_data_id: data_hash,
        owner: alice.clone(),
        amount: 1,
        version: 5,
    });

    let mut tailer = positioned(token_only_tailer(&harness, harness.checkpoints.clone(), 6)?).await?;
    let report = tailer.process_next_batch(&CancellationToken::new()).await?;
    assert_eq!((report.start_version, report.end_version), (6, 14));
    assert!(report.is_success(), "mutation and transfer in one batch must reconcile");
    assert!(tailer.halted_processors().is_empty());

    let old = harness.store.ownership(&old_hash, &alice).context("old row")?;
    assert_eq!((old.amount, old.version), (0, 12));
    let sender = harness.store.ownership(&new_hash, &alice).context("sender row")?;
    assert_eq!((sender.amount, sender.version), (0, 14));
    let receiver = harness.store.ownership(&new_hash, &bob).context("receiver row")?;
    assert_eq!((receiver.amount, receiver.version), (1, 14));

    harness.shutdown().await;
    Ok(())
}
