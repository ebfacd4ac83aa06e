use super::models::{
    CollectionRecord, ModuleRecord, OwnershipKey, OwnershipRecord, PendingTransferRecord,
    ProcessorStatus, TokenActivityRecord, TokenDataRecord, TokenMetadataRecord,
    TokenPropertyRecord, TransferEventRecord,
};
use super::{ModuleStore, StatusStore, TokenStore};
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Tables {
    collections: BTreeMap<String, CollectionRecord>,
    token_datas: BTreeMap<String, TokenDataRecord>,
    ownerships: BTreeMap<OwnershipKey, OwnershipRecord>,
    pending_transfers: BTreeMap<String, PendingTransferRecord>,
    token_properties: BTreeMap<(String, u64), TokenPropertyRecord>,
    activities: BTreeMap<(String, u64), TokenActivityRecord>,
    transfer_events: BTreeMap<(String, u64), TransferEventRecord>,
    token_metadata: BTreeMap<String, TokenMetadataRecord>,
    modules: BTreeMap<(String, String, u64), ModuleRecord>,
    statuses: BTreeMap<(String, u64), ProcessorStatus>,
    bulk_writes: usize,
}

/// In-process implementation of every store trait, backed by ordered maps.
///
/// Each bulk call is applied under one lock, so a category is either fully
/// written or untouched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` bulk writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn token_data(&self, token_data_id: &str) -> Option<TokenDataRecord> {
        self.lock().token_datas.get(token_data_id).cloned()
    }

    pub fn collection(&self, collection_id: &str) -> Option<CollectionRecord> {
        self.lock().collections.get(collection_id).cloned()
    }

    pub fn ownership(&self, token_id: &str, owner: &str) -> Option<OwnershipRecord> {
        self.lock()
            .ownerships
            .get(&OwnershipKey::new(token_id, owner))
            .cloned()
    }

    pub fn ownerships(&self) -> Vec<OwnershipRecord> {
        self.lock().ownerships.values().cloned().collect()
    }

    pub fn pending_transfer(&self, pending_id: &str) -> Option<PendingTransferRecord> {
        self.lock().pending_transfers.get(pending_id).cloned()
    }

    pub fn token_properties(&self) -> Vec<TokenPropertyRecord> {
        self.lock().token_properties.values().cloned().collect()
    }

    pub fn activities(&self) -> Vec<TokenActivityRecord> {
        self.lock().activities.values().cloned().collect()
    }

    pub fn transfer_events(&self) -> Vec<TransferEventRecord> {
        self.lock().transfer_events.values().cloned().collect()
    }

    pub fn token_metadata(&self, token_data_id: &str) -> Option<TokenMetadataRecord> {
        self.lock().token_metadata.get(token_data_id).cloned()
    }

    pub fn modules(&self) -> Vec<ModuleRecord> {
        self.lock().modules.values().cloned().collect()
    }

    pub fn statuses(&self) -> Vec<ProcessorStatus> {
        self.lock().statuses.values().cloned().collect()
    }

    /// Number of bulk write calls that reached the tables.
    pub fn bulk_writes(&self) -> usize {
        self.lock().bulk_writes
    }

    pub fn seed_token_data(&self, record: TokenDataRecord) {
        self.lock()
            .token_datas
            .insert(record.token_data_id.clone(), record);
    }

    pub fn seed_ownership(&self, record: OwnershipRecord) {
        self.lock().ownerships.insert(record.key(), record);
    }

    pub fn seed_pending_transfer(&self, record: PendingTransferRecord) {
        self.lock()
            .pending_transfers
            .insert(record.pending_id.clone(), record);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<F>(&self, table: &str, rows: usize, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Tables),
    {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            bail!("store unavailable while writing {rows} {table} rows");
        }
        if rows == 0 {
            return Ok(());
        }
        let mut tables = self.lock();
        apply(&mut tables);
        tables.bulk_writes += 1;
        Ok(())
    }

    fn select<K, V, Q>(map: &BTreeMap<K, V>, keys: &[Q]) -> Vec<V>
    where
        K: Ord + std::borrow::Borrow<Q>,
        Q: Ord,
        V: Clone,
    {
        keys.iter().filter_map(|key| map.get(key).cloned()).collect()
    }
}

impl TokenStore for MemoryStore {
    fn load_collections<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<CollectionRecord>>> {
        Box::pin(async move { Ok(Self::select(&self.lock().collections, ids)) })
    }

    fn load_token_datas<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<TokenDataRecord>>> {
        Box::pin(async move { Ok(Self::select(&self.lock().token_datas, ids)) })
    }

    fn load_ownerships<'a>(
        &'a self,
        keys: &'a [OwnershipKey],
    ) -> BoxFuture<'a, Result<Vec<OwnershipRecord>>> {
        Box::pin(async move { Ok(Self::select(&self.lock().ownerships, keys)) })
    }

    fn load_ownerships_by_token<'a>(
        &'a self,
        token_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<OwnershipRecord>>> {
        Box::pin(async move {
            let tables = self.lock();
            Ok(tables
                .ownerships
                .values()
                .filter(|row| token_ids.contains(&row.token_id))
                .cloned()
                .collect())
        })
    }

    fn load_pending_transfers<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<PendingTransferRecord>>> {
        Box::pin(async move { Ok(Self::select(&self.lock().pending_transfers, ids)) })
    }

    fn upsert_collections(&self, rows: Vec<CollectionRecord>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("collection", rows.len(), |tables| {
                for row in rows {
                    tables.collections.insert(row.collection_id.clone(), row);
                }
            })
        })
    }

    fn upsert_token_datas(&self, rows: Vec<TokenDataRecord>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("token data", rows.len(), |tables| {
                for row in rows {
                    tables.token_datas.insert(row.token_data_id.clone(), row);
                }
            })
        })
    }

    fn upsert_ownerships(&self, rows: Vec<OwnershipRecord>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("ownership", rows.len(), |tables| {
                for row in rows {
                    tables.ownerships.insert(row.key(), row);
                }
            })
        })
    }

    fn upsert_pending_transfers(
        &self,
        rows: Vec<PendingTransferRecord>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("pending transfer", rows.len(), |tables| {
                for row in rows {
                    tables.pending_transfers.insert(row.pending_id.clone(), row);
                }
            })
        })
    }

    fn upsert_token_properties(
        &self,
        rows: Vec<TokenPropertyRecord>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("token property", rows.len(), |tables| {
                for row in rows {
                    tables
                        .token_properties
                        .insert((row.token_id.clone(), row.version), row);
                }
            })
        })
    }

    fn upsert_activities(&self, rows: Vec<TokenActivityRecord>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("activity", rows.len(), |tables| {
                for row in rows {
                    tables
                        .activities
                        .insert((row.event_key.clone(), row.sequence_number), row);
                }
            })
        })
    }

    fn upsert_transfer_events(
        &self,
        rows: Vec<TransferEventRecord>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("transfer event", rows.len(), |tables| {
                for row in rows {
                    tables
                        .transfer_events
                        .insert((row.event_key.clone(), row.sequence_number), row);
                }
            })
        })
    }

    fn upsert_token_metadata(
        &self,
        rows: Vec<TokenMetadataRecord>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("token metadata", rows.len(), |tables| {
                for row in rows {
                    tables.token_metadata.insert(row.token_data_id.clone(), row);
                }
            })
        })
    }
}

impl ModuleStore for MemoryStore {
    fn upsert_modules(&self, rows: Vec<ModuleRecord>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.write("module", rows.len(), |tables| {
                for row in rows {
                    tables
                        .modules
                        .insert((row.address.clone(), row.name.clone(), row.version), row);
                }
            })
        })
    }
}

impl StatusStore for MemoryStore {
    fn upsert_status(&self, status: ProcessorStatus) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.lock()
                .statuses
                .insert((status.name.clone(), status.start_version), status);
            Ok(())
        })
    }

    fn failed_statuses<'a>(
        &'a self,
        processor: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProcessorStatus>>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .statuses
                .values()
                .filter(|status| status.name == processor && !status.success)
                .cloned()
                .collect())
        })
    }
}
