use std::time::Duration;

use crate::support::{
    helpers::{
        addr, init_tracing, publish_tx, test_config, wait_for_checkpoint, Harness, CHAIN_ID,
    },
    mock_node::MockLedger,
};
use anyhow::{Context, Result};
use ledgerscan::{Runner, TailerError, MODULE_PROCESSOR_NAME, TOKEN_PROCESSOR_NAME};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_exits_on_chain_mismatch() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(8);
    let harness = Harness::start(ledger.clone()).await?;
    let config = test_config(harness.url(), 4, 0)?;

    harness.tailer(&config)?.check_or_update_chain_id().await?;
    ledger.set_chain_id(CHAIN_ID + 7);

    let mut runner = Runner::new(config.clone(), harness.tailer(&config)?);
    let outcome = timeout(Duration::from_secs(5), runner.run_until_ctrl_c())
        .await
        .context("runner should stop after the chain check fails")?;

    let err = outcome.expect_err("mismatched chain must abort the runner");
    assert!(
        matches!(
            err.downcast_ref::<TailerError>(),
            Some(TailerError::ChainMismatch { .. })
        ),
        "runner did not surface the chain mismatch, got {err:#}"
    );
    assert!(!runner.is_running());
    assert!(runner.tailer().is_some(), "tailer is handed back after the run");
    assert_eq!(ledger.transaction_requests(), 0);

    harness.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_can_restart_after_stop() -> Result<()> {
    init_tracing();
    let ledger = MockLedger::new(CHAIN_ID);
    ledger.push_empty(9);
    ledger.push(publish_tx(&addr(9), &["first"]));
    let harness = Harness::start(ledger.clone()).await?;
    let config = test_config(harness.url(), 3, 0)?;

    let mut runner = Runner::new(config.clone(), harness.tailer(&config)?);
    assert!(runner.stop().await.is_ok(), "stopping an idle runner is a no-op");

    runner.start().await?;
    assert!(runner.is_running());
    wait_for_checkpoint(&harness.checkpoints, TOKEN_PROCESSOR_NAME, 9, Duration::from_secs(5)).await?;
    runner.stop().await?;
    assert!(!runner.is_running());

    ledger.push_empty(9);
    ledger.push(publish_tx(&addr(9), &["second"]));

    runner.start().await?;
    wait_for_checkpoint(&harness.checkpoints, MODULE_PROCESSOR_NAME, 19, Duration::from_secs(5)).await?;
    runner.stop().await?;

    let mut names: Vec<String> = harness
        .store
        .modules()
        .into_iter()
        .map(|module| module.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["first".to_string(), "second".to_string()]);

    let tailer = runner.tailer().context("tailer is handed back after stop")?;
    assert!(tailer.halted_processors().is_empty());

    harness.shutdown().await;
    Ok(())
}
