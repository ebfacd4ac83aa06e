use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use ledgerscan::{
    BatchContext, CheckpointStore, IndexerConfig, LedgerAuth, LedgerClient, LedgerClientOptions,
    MemoryCheckpointCache, MemoryStore, ModuleProcessor, ProcessSummary, ProcessorFuture, Tailer,
    TokenProcessor, TransactionBatch, TransactionProcessor,
};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use super::mock_node::{MockLedger, MockLedgerNode};

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub const CHAIN_ID: u64 = 4;

/// Full-width account address, as the node renders it.
pub fn addr(n: u64) -> String {
    format!("0x{n:064x}")
}

pub fn token_data_id(creator: &str, collection: &str, name: &str) -> Value {
    json!({ "creator": creator, "collection": collection, "name": name })
}

pub fn token_id(token_data_id: &Value, property_version: u64) -> Value {
    json!({
        "token_data_id": token_data_id,
        "property_version": property_version.to_string(),
    })
}

/// Event emitted on handle `creation_number` of `account`.
pub fn event(account: &str, creation_number: u64, sequence: u64, type_tag: &str, data: Value) -> Value {
    json!({
        "guid": {
            "creation_number": creation_number.to_string(),
            "account_address": account,
        },
        "sequence_number": sequence.to_string(),
        "type": type_tag,
        "data": data,
    })
}

pub fn user_tx(sender: &str, events: Vec<Value>) -> Value {
    json!({
        "type": "user_transaction",
        "success": true,
        "vm_status": "Executed successfully",
        "timestamp": "1665609760857472",
        "sender": sender,
        "payload": {
            "type": "entry_function_payload",
            "function": "0x3::token::direct_transfer_script",
            "arguments": [],
        },
        "events": events,
    })
}

pub fn failed_tx(sender: &str, events: Vec<Value>) -> Value {
    let mut tx = user_tx(sender, events);
    tx["success"] = Value::Bool(false);
    tx["vm_status"] = Value::String("Move abort in 0x3::token: EINSUFFICIENT_BALANCE".into());
    tx
}

pub fn publish_tx(sender: &str, module_names: &[&str]) -> Value {
    let modules: Vec<Value> = module_names
        .iter()
        .map(|name| {
            json!({
                "bytecode": format!("0xa11ceb0b05{}", hex_name(name)),
                "abi": {
                    "address": sender,
                    "name": name,
                    "friends": [],
                    "exposed_functions": [{ "name": "init" }],
                    "structs": [],
                },
            })
        })
        .collect();
    json!({
        "type": "user_transaction",
        "success": true,
        "vm_status": "Executed successfully",
        "timestamp": "1665609760857472",
        "sender": sender,
        "payload": { "type": "module_bundle_payload", "modules": modules },
        "events": [],
    })
}

fn hex_name(name: &str) -> String {
    name.bytes().map(|b| format!("{b:02x}")).collect()
}

pub mod token_events {
    use serde_json::{json, Value};

    pub const CREATE_COLLECTION: &str = "0x3::token::CreateCollectionEvent";
    pub const CREATE_TOKEN_DATA: &str = "0x3::token::CreateTokenDataEvent";
    pub const MINT: &str = "0x3::token::MintTokenEvent";
    pub const BURN: &str = "0x3::token::BurnTokenEvent";
    pub const DEPOSIT: &str = "0x3::token::DepositEvent";
    pub const WITHDRAW: &str = "0x3::token::WithdrawEvent";
    pub const OFFER: &str = "0x3::token_transfers::TokenOfferEvent";
    pub const CLAIM: &str = "0x3::token_transfers::TokenClaimEvent";
    pub const CANCEL_OFFER: &str = "0x3::token_transfers::TokenCancelOfferEvent";

    pub fn create_collection(creator: &str, name: &str, maximum: u64) -> Value {
        json!({
            "creator": creator,
            "collection_name": name,
            "description": "",
            "uri": "https://example.org/collection.json",
            "maximum": maximum.to_string(),
        })
    }

    pub fn create_token_data(id: &Value, maximum: u64) -> Value {
        json!({
            "id": id,
            "description": "",
            "maximum": maximum.to_string(),
            "uri": "https://arweave.net/token.json",
            "royalty_payee_address": id["creator"],
            "royalty_points_denominator": "100",
            "royalty_points_numerator": "5",
            "name": id["name"],
            "mutability_config": {},
            "property_keys": [],
            "property_values": [],
            "property_types": [],
        })
    }

    pub fn mint(id: &Value, amount: u64) -> Value {
        json!({ "id": id, "amount": amount.to_string() })
    }

    /// Body shared by deposit, withdraw and burn events.
    pub fn amount(id: &Value, amount: u64) -> Value {
        json!({ "id": id, "amount": amount.to_string() })
    }

    pub fn offer(to: &str, token_id: &Value, amount: u64) -> Value {
        json!({ "to_address": to, "token_id": token_id, "amount": amount.to_string() })
    }
}

pub fn test_config(url: &str, batch_size: u16, start_version: u64) -> Result<IndexerConfig> {
    IndexerConfig::builder()
        .node_url(url)
        .batch_size(batch_size)
        .start_version(start_version)
        .fetch_timeout(Duration::from_secs(5))
        .processor_timeout(Duration::from_secs(5))
        .idle_backoff(Duration::from_millis(20))
        .max_backoff(Duration::from_millis(100))
        .checkpoint_retry_attempts(3)
        .decode_workers(2)
        .metrics_interval(Duration::from_millis(200))
        .build()
}

/// A ledger node, an in-memory store and a checkpoint cache wired together.
pub struct Harness {
    pub ledger: MockLedger,
    pub node: MockLedgerNode,
    pub cache: Arc<MemoryCheckpointCache>,
    pub checkpoints: CheckpointStore,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub async fn start(ledger: MockLedger) -> Result<Self> {
        let node = MockLedgerNode::start(ledger.clone()).await?;
        let cache = Arc::new(MemoryCheckpointCache::new());
        Ok(Self {
            ledger,
            node,
            checkpoints: CheckpointStore::new(cache.clone()),
            cache,
            store: Arc::new(MemoryStore::new()),
        })
    }

    pub fn url(&self) -> &str {
        self.node.url()
    }

    /// Single-attempt client so node failures surface to the tailer.
    pub fn client(&self) -> Result<LedgerClient> {
        let options = LedgerClientOptions {
            request_timeout: Duration::from_secs(5),
            max_attempts: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            breaker_failure_threshold: 100,
            breaker_cooldown: Duration::from_millis(50),
        };
        LedgerClient::with_options(self.url(), LedgerAuth::None, options)
    }

    /// Tailer without processors.
    pub fn bare_tailer(&self, config: &IndexerConfig) -> Result<Tailer> {
        Ok(Tailer::new(
            Arc::new(self.client()?),
            self.checkpoints.clone(),
            self.store.clone(),
            config,
        ))
    }

    /// Tailer running the token and module processors over the shared store.
    pub fn tailer(&self, config: &IndexerConfig) -> Result<Tailer> {
        let mut tailer = self.bare_tailer(config)?;
        tailer.add_processor(Arc::new(TokenProcessor::from_config(
            self.store.clone(),
            config,
        )?))?;
        tailer.add_processor(Arc::new(ModuleProcessor::new(self.store.clone())))?;
        Ok(tailer)
    }

    pub async fn shutdown(self) {
        self.node.shutdown().await;
    }
}

/// Processor that records every version it is handed.
#[derive(Clone)]
pub struct RecordingProcessor {
    name: String,
    seen: Arc<Mutex<Vec<u64>>>,
}

impl RecordingProcessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().expect("recording processor poisoned").clone()
    }
}

impl TransactionProcessor for RecordingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn process<'a>(
        &'a self,
        batch: &'a TransactionBatch,
        _ctx: &'a BatchContext,
    ) -> ProcessorFuture<'a> {
        Box::pin(async move {
            let mut seen = self.seen.lock().expect("recording processor poisoned");
            seen.extend(batch.transactions().iter().map(|tx| tx.version));
            Ok(ProcessSummary {
                transactions: batch.len(),
                records_written: 0,
            })
        })
    }
}

pub async fn wait_for_checkpoint(
    checkpoints: &CheckpointStore,
    processor: &str,
    version: u64,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let current = checkpoints.checkpoint(processor, CHAIN_ID).await?;
        if current.is_some_and(|current| current >= version) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("{processor} did not reach version {version} within {timeout:?} (at {current:?})");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_until<F>(mut condition: F, timeout: Duration, what: &str) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            bail!("timed out after {timeout:?} waiting for {what}");
        }
        sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}
