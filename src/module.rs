//! Records Move modules published by user transactions.

use crate::runtime::protocol::{
    BatchContext, FailureKind, ProcessSummary, ProcessorError, ProcessorFuture, TransactionBatch,
    TransactionProcessor,
};
use crate::store::{ModuleRecord, ModuleStore};
use crate::types::{ModuleBytecode, Transaction, TransactionPayload};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const MODULE_PROCESSOR_NAME: &str = "module_processor";

const PUBLISH_PACKAGE_FUNCTION: &str = "::code::publish_package_txn";

pub struct ModuleProcessor {
    store: Arc<dyn ModuleStore>,
}

impl ModuleProcessor {
    pub fn new(store: Arc<dyn ModuleStore>) -> Self {
        Self { store }
    }

    async fn process_batch(
        &self,
        batch: &TransactionBatch,
        ctx: &BatchContext,
    ) -> Result<ProcessSummary, ProcessorError> {
        let modules: Vec<ModuleRecord> = batch
            .transactions()
            .iter()
            .filter(|tx| tx.is_indexable())
            .flat_map(published_modules)
            .collect();

        if ctx.is_cancelled() {
            return Err(ProcessorError::new(
                FailureKind::Cancelled,
                anyhow::anyhow!("cancelled before persisting modules"),
            ));
        }

        let records_written = modules.len();
        if records_written > 0 {
            self.store
                .upsert_modules(modules)
                .await
                .map_err(|err| ProcessorError::new(FailureKind::Transform, err))?;
            tracing::debug!(
                processor = MODULE_PROCESSOR_NAME,
                start_version = batch.start_version(),
                end_version = batch.end_version(),
                records_written,
                "modules recorded"
            );
        }

        Ok(ProcessSummary {
            transactions: batch.len(),
            records_written,
        })
    }
}

impl TransactionProcessor for ModuleProcessor {
    fn name(&self) -> &str {
        MODULE_PROCESSOR_NAME
    }

    fn process<'a>(
        &'a self,
        batch: &'a TransactionBatch,
        ctx: &'a BatchContext,
    ) -> ProcessorFuture<'a> {
        Box::pin(self.process_batch(batch, ctx))
    }
}

/// Modules carried by `tx`, either as a module bundle or as the code argument
/// of `publish_package_txn`.
pub fn published_modules(tx: &Transaction) -> Vec<ModuleRecord> {
    let Some(payload) = &tx.payload else {
        return Vec::new();
    };
    let creator = tx.sender_or_default();

    if payload.kind == TransactionPayload::MODULE_BUNDLE {
        return payload
            .modules
            .iter()
            .enumerate()
            .map(|(index, module)| module_record(tx, creator, index, module))
            .collect();
    }

    let is_publish = payload.kind == TransactionPayload::ENTRY_FUNCTION
        && payload
            .function
            .as_deref()
            .is_some_and(|function| function.ends_with(PUBLISH_PACKAGE_FUNCTION));
    if !is_publish {
        return Vec::new();
    }

    // publish_package_txn(metadata_serialized, code)
    let Some(Value::Array(code)) = payload.arguments.get(1) else {
        tracing::warn!(version = tx.version, "publish_package_txn without a code argument");
        return Vec::new();
    };
    code.iter()
        .filter_map(Value::as_str)
        .enumerate()
        .map(|(index, bytecode)| {
            let module = ModuleBytecode {
                bytecode: bytecode.to_string(),
                abi: None,
            };
            module_record(tx, creator, index, &module)
        })
        .collect()
}

fn module_record(
    tx: &Transaction,
    creator: &str,
    index: usize,
    module: &ModuleBytecode,
) -> ModuleRecord {
    let (address, name, friends, exposed_function_count, struct_count) = match &module.abi {
        Some(abi) => (
            abi.address.clone(),
            abi.name.clone(),
            abi.friends.clone(),
            abi.exposed_function_count,
            abi.struct_count,
        ),
        None => (creator.to_string(), format!("#{index}"), Vec::new(), 0, 0),
    };

    ModuleRecord {
        address,
        name,
        version: tx.version,
        creator: creator.to_string(),
        bytecode_sha256: bytecode_sha256(&module.bytecode),
        friends,
        exposed_function_count,
        struct_count,
        timestamp: tx.timestamp,
    }
}

fn bytecode_sha256(bytecode: &str) -> String {
    let digits = bytecode.strip_prefix("0x").unwrap_or(bytecode);
    match hex::decode(digits) {
        Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
        Err(_) => hex::encode(Sha256::digest(bytecode.as_bytes())),
    }
}
