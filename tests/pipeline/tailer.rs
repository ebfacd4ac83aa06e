use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{
        addr, event, failed_tx, init_tracing, publish_tx, test_config, token_data_id,
        token_events::{self as ev},
        token_id, user_tx, wait_for_checkpoint, Harness, RecordingProcessor, CHAIN_ID,
    },
    mock_node::MockLedger,
};
use anyhow::{Context, Result};
use ledgerscan::token::{pending_id, TokenDataId, TokenId};
use ledgerscan::{
    CheckpointStore, FetchError, MemoryCheckpointCache, Tailer, TailerError, TokenProcessor,
    MODULE_PROCESSOR_NAME, TOKEN_PROCESSOR_NAME,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

fn hashed_data_id(id: &Value) -> Result<String> {
    Ok(serde_json::from_value::<TokenDataId>(id.clone())?.hash_id())
}

fn hashed_token_id(id: &Value) -> Result<String> {
    Ok(serde_json::from_value::<TokenId>(id.clone())?.hash_id())
}

fn spawn_tailer(mut tailer: Tailer, shutdown: CancellationToken) -> JoinHandle<(Tailer, Result<()>)> {
    tokio::spawn(async move {
        let result = tailer.run(shutdown).await;
        (tailer, result)
    })
}

/// Collection, token, mint, a transfer, then an offer that is claimed.
fn seed_token_lifecycle(ledger: &MockLedger) -> (Value, Value) {
    let (creator, bob, carol) = (addr(1), addr(2), addr(3));
    let data_id = token_data_id(&creator, "Aptos Zero", "Zero #1");
    let token = token_id(&data_id, 0);

    ledger.push(user_tx(
        &creator,
        vec![
            event(&creator, 2, 0, ev::CREATE_COLLECTION, ev::create_collection(&creator, "Aptos Zero", 100)),
            event(&creator, 3, 0, ev::CREATE_TOKEN_DATA, ev::create_token_data(&data_id, 50)),
            event(&creator, 4, 0, ev::MINT, ev::mint(&data_id, 10)),
            event(&creator, 5, 0, ev::DEPOSIT, ev::amount(&token, 10)),
        ],
    ));
    ledger.push(failed_tx(&bob, vec![event(&bob, 5, 0, ev::DEPOSIT, ev::amount(&token, 999))]));
    ledger.push(user_tx(
        &creator,
        vec![
            event(&creator, 6, 0, ev::WITHDRAW, ev::amount(&token, 3)),
            event(&bob, 5, 0, ev::DEPOSIT, ev::amount(&token, 3)),
        ],
    ));
    ledger.push(user_tx(
        &bob,
        vec![
            event(&bob, 6, 0, ev::WITHDRAW, ev::amount(&token, 2)),
            event(&bob, 7, 0, ev::OFFER, ev::offer(&carol, &token, 2)),
        ],
    ));
    ledger.push(user_tx(
        &carol,
        vec![
            event(&bob, 8, 0, ev::CLAIM, ev::offer(&carol, &token, 2)),
            event(&carol, 5, 0, ev::DEPOSIT, ev::amount(&token, 2)),
        ],
    ));
    ledger.push(publish_tx(&creator, &["marketplace"]));
    (data_id, token)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tails_token_lifecycle_into_reconciled_state() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    let (data_id, token) = seed_token_lifecycle(&ledger);
    let last = ledger.last_version().context("ledger is empty")?;
    let harness = Harness::start(ledger).await?;

    let config = test_config(harness.url(), 2, 0)?;
    let shutdown = CancellationToken::new();
    let task = spawn_tailer(harness.tailer(&config)?, shutdown.clone());

    wait_for_checkpoint(&harness.checkpoints, TOKEN_PROCESSOR_NAME, last, WAIT).await?;
    wait_for_checkpoint(&harness.checkpoints, MODULE_PROCESSOR_NAME, last, WAIT).await?;
    shutdown.cancel();
    let (tailer, result) = task.await?;
    result?;

    let token_hash = hashed_token_id(&token)?;
    let data_hash = hashed_data_id(&data_id)?;
    let store = &harness.store;

    let creator = store.ownership(&token_hash, &addr(1)).context("creator row")?;
    assert_eq!((creator.amount, creator.version), (7, 2));
    let bob = store.ownership(&token_hash, &addr(2)).context("bob row")?;
    assert_eq!((bob.amount, bob.version), (1, 3));
    let carol = store.ownership(&token_hash, &addr(3)).context("carol row")?;
    assert_eq!((carol.amount, carol.version), (2, 4));

    let data = store.token_data(&data_hash).context("token data row")?;
    assert_eq!(data.supply, 10);
    assert_eq!(data.minted_at, Some(0));
    assert!(store
        .collection(&format!("{}:Aptos Zero", addr(1)))
        .is_some());

    let pending = store
        .pending_transfer(&pending_id(&token_hash, &addr(2), &addr(3)))
        .context("pending row")?;
    assert_eq!((pending.amount, pending.version), (0, 4));

    assert_eq!(store.activities().len(), 10, "failed transaction must not count");
    let modules = store.modules();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].name, "marketplace");
    assert_eq!(modules[0].version, last);

    assert!(store.statuses().iter().all(|status| status.success));
    assert!(tailer.error_versions(TOKEN_PROCESSOR_NAME).await?.is_empty());
    assert_eq!(tailer.telemetry().snapshot().last_retired_version, Some(last));

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chain_mismatch_aborts_before_fetching() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(5);
    let harness = Harness::start(ledger.clone()).await?;
    let config = test_config(harness.url(), 10, 0)?;

    let mut first = harness.tailer(&config)?;
    assert_eq!(first.check_or_update_chain_id().await?, CHAIN_ID);

    ledger.set_chain_id(CHAIN_ID + 1);
    let mut tailer = harness.tailer(&config)?;
    let err = tailer
        .run(CancellationToken::new())
        .await
        .expect_err("chain id changed under the checkpoints");

    assert_eq!(
        err.downcast_ref::<TailerError>(),
        Some(&TailerError::ChainMismatch {
            stored: CHAIN_ID,
            current: CHAIN_ID + 1
        })
    );
    assert_eq!(ledger.transaction_requests(), 0);
    assert!(harness.store.statuses().is_empty());

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resumes_from_lowest_checkpoint_and_trims_per_processor() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(130);
    let harness = Harness::start(ledger).await?;
    let config = test_config(harness.url(), 50, 0)?;

    let (a, b, c) = (
        RecordingProcessor::new("a"),
        RecordingProcessor::new("b"),
        RecordingProcessor::new("c"),
    );
    let mut tailer = harness.bare_tailer(&config)?;
    for (name, processor, checkpoint) in [("a", &a, 100), ("b", &b, 80), ("c", &c, 120)] {
        harness.checkpoints.advance(name, CHAIN_ID, checkpoint).await?;
        tailer.add_processor(Arc::new(processor.clone()))?;
    }

    tailer.check_or_update_chain_id().await?;
    assert_eq!(tailer.set_fetcher_to_lowest_processor_version().await?, 80);
    assert_eq!(tailer.fetcher_cursor(), Some(80));

    let report = tailer.process_next_batch(&CancellationToken::new()).await?;
    assert_eq!((report.start_version, report.end_version), (80, 129));
    assert!(report.is_success());

    assert_eq!(a.seen(), (101..=129).collect::<Vec<_>>());
    assert_eq!(b.seen(), (81..=129).collect::<Vec<_>>());
    assert_eq!(c.seen(), (121..=129).collect::<Vec<_>>());
    for name in ["a", "b", "c"] {
        assert_eq!(harness.checkpoints.checkpoint(name, CHAIN_ID).await?, Some(129));
    }

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn processor_without_checkpoint_resumes_at_start_version() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(10);
    let harness = Harness::start(ledger).await?;
    let config = test_config(harness.url(), 10, 50)?;

    let mut tailer = harness.bare_tailer(&config)?;
    harness.checkpoints.advance("seasoned", CHAIN_ID, 100).await?;
    tailer.add_processor(Arc::new(RecordingProcessor::new("seasoned")))?;
    tailer.add_processor(Arc::new(RecordingProcessor::new("fresh")))?;
    assert!(tailer
        .add_processor(Arc::new(RecordingProcessor::new("fresh")))
        .is_err());

    tailer.check_or_update_chain_id().await?;
    assert_eq!(tailer.set_fetcher_to_lowest_processor_version().await?, 50);

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn supply_underflow_halts_only_the_token_processor() -> Result<()> {
    init_tracing();
    let creator = addr(1);
    let data_id = token_data_id(&creator, "Aptos Zero", "Zero #2");
    let token = token_id(&data_id, 0);

    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push(user_tx(
        &creator,
        vec![
            event(&creator, 3, 0, ev::CREATE_TOKEN_DATA, ev::create_token_data(&data_id, 5)),
            event(&creator, 4, 0, ev::MINT, ev::mint(&data_id, 1)),
        ],
    ));
    ledger.push(user_tx(&creator, vec![event(&creator, 9, 0, ev::BURN, ev::amount(&token, 5))]));
    ledger.push(publish_tx(&creator, &["after_halt"]));
    let harness = Harness::start(ledger).await?;

    let config = test_config(harness.url(), 1, 0)?;
    let shutdown = CancellationToken::new();
    let task = spawn_tailer(harness.tailer(&config)?, shutdown.clone());

    wait_for_checkpoint(&harness.checkpoints, MODULE_PROCESSOR_NAME, 2, WAIT).await?;
    shutdown.cancel();
    let (tailer, result) = task.await?;
    result?;

    assert_eq!(tailer.halted_processors(), vec![TOKEN_PROCESSOR_NAME.to_string()]);
    assert_eq!(
        harness.checkpoints.checkpoint(TOKEN_PROCESSOR_NAME, CHAIN_ID).await?,
        Some(0)
    );
    let data = harness
        .store
        .token_data(&hashed_data_id(&data_id)?)
        .context("token data row")?;
    assert_eq!(data.supply, 1, "failed batch must not write");

    let failed = tailer.error_versions(TOKEN_PROCESSOR_NAME).await?;
    assert_eq!(failed.len(), 1);
    assert_eq!((failed[0].start_version, failed[0].end_version), (1, 1));
    assert!(failed[0]
        .detail
        .as_deref()
        .unwrap_or_default()
        .contains("would underflow"));
    assert_eq!(harness.store.modules().len(), 1);

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_fails_once_every_processor_is_halted() -> Result<()> {
    init_tracing();
    let creator = addr(1);
    let data_id = token_data_id(&creator, "Aptos Zero", "Ghost");

    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(2);
    ledger.push(user_tx(&creator, vec![event(&creator, 4, 0, ev::MINT, ev::mint(&data_id, 1))]));
    let harness = Harness::start(ledger).await?;

    let config = test_config(harness.url(), 10, 0)?;
    let mut tailer = harness.bare_tailer(&config)?;
    tailer.add_processor(Arc::new(TokenProcessor::new(
        harness.store.clone(),
        1,
    )))?;

    let err = tokio::time::timeout(WAIT, tailer.run(CancellationToken::new()))
        .await
        .context("run should stop on its own")?
        .expect_err("unknown token data halts the only processor");
    assert_eq!(
        err.downcast_ref::<TailerError>(),
        Some(&TailerError::AllProcessorsHalted {
            halted: vec![TOKEN_PROCESSOR_NAME.to_string()]
        })
    );
    assert_eq!(
        harness.checkpoints.checkpoint(TOKEN_PROCESSOR_NAME, CHAIN_ID).await?,
        None
    );

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replaying_without_checkpoints_leaves_state_unchanged() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    seed_token_lifecycle(&ledger);
    let last = ledger.last_version().context("ledger is empty")?;
    let harness = Harness::start(ledger).await?;
    let config = test_config(harness.url(), 3, 0)?;

    let shutdown = CancellationToken::new();
    let task = spawn_tailer(harness.tailer(&config)?, shutdown.clone());
    wait_for_checkpoint(&harness.checkpoints, TOKEN_PROCESSOR_NAME, last, WAIT).await?;
    shutdown.cancel();
    task.await?.1?;

    let ownerships = harness.store.ownerships();
    let activities = harness.store.activities();

    // Same store, fresh checkpoints: every version is applied a second time.
    let cache = Arc::new(MemoryCheckpointCache::new());
    let replay = Harness {
        checkpoints: CheckpointStore::new(cache.clone()),
        cache,
        ..harness
    };
    let shutdown = CancellationToken::new();
    let task = spawn_tailer(replay.tailer(&config)?, shutdown.clone());
    wait_for_checkpoint(&replay.checkpoints, TOKEN_PROCESSOR_NAME, last, WAIT).await?;
    shutdown.cancel();
    let (tailer, result) = task.await?;
    result?;

    assert!(tailer.halted_processors().is_empty());
    assert_eq!(replay.store.ownerships(), ownerships);
    assert_eq!(replay.store.activities(), activities);

    replay.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_fetch_failures_back_off_and_recover() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(12);
    let harness = Harness::start(ledger.clone()).await?;
    let config = test_config(harness.url(), 4, 0)?;

    let mut tailer = harness.tailer(&config)?;
    let telemetry = tailer.telemetry();
    tailer.check_or_update_chain_id().await?;

    ledger.fail_next_transaction_requests(2);
    let shutdown = CancellationToken::new();
    let task = spawn_tailer(tailer, shutdown.clone());

    wait_for_checkpoint(&harness.checkpoints, TOKEN_PROCESSOR_NAME, 11, WAIT).await?;
    shutdown.cancel();
    task.await?.1?;

    assert!(telemetry.snapshot().fetch_failures >= 1);
    assert_eq!(telemetry.snapshot().last_retired_version, Some(11));

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn process_version_targets_a_single_transaction() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(3);
    ledger.push(publish_tx(&addr(7), &["one_off"]));
    let harness = Harness::start(ledger).await?;
    let config = test_config(harness.url(), 10, 0)?;

    let mut tailer = harness.tailer(&config)?;
    tailer.check_or_update_chain_id().await?;
    let cancel = CancellationToken::new();

    let report = tailer.process_version(3, &cancel).await?;
    assert_eq!((report.start_version, report.end_version), (3, 3));
    assert!(report.is_success());
    assert_eq!(harness.store.modules().len(), 1);

    let err = tailer
        .process_version(999, &cancel)
        .await
        .expect_err("version past the tip");
    assert!(matches!(
        err.downcast_ref::<FetchError>(),
        Some(FetchError::NotFound { version: 999 })
    ));

    harness.shutdown().await;
    Ok(())
}
