//! Persistence seams for reconciled state, published modules, and processor
//! status rows. Loads are keyed (`WHERE key IN (...)`) and writes are bulk
//! upserts, one call per table.

pub mod memory;
pub mod models;

pub use memory::MemoryStore;
pub use models::{
    CollectionRecord, ModuleRecord, OwnershipKey, OwnershipRecord, PendingTransferRecord,
    ProcessorStatus, TokenActivityRecord, TokenDataRecord, TokenMetadataRecord,
    TokenPropertyRecord, TransferEventKind, TransferEventRecord,
};

use anyhow::Result;
use futures::future::BoxFuture;

pub trait TokenStore: Send + Sync {
    fn load_collections<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<CollectionRecord>>>;

    fn load_token_datas<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<TokenDataRecord>>>;

    fn load_ownerships<'a>(
        &'a self,
        keys: &'a [OwnershipKey],
    ) -> BoxFuture<'a, Result<Vec<OwnershipRecord>>>;

    /// Every ownership row of the given token ids, across all owners.
    fn load_ownerships_by_token<'a>(
        &'a self,
        token_ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<OwnershipRecord>>>;

    fn load_pending_transfers<'a>(
        &'a self,
        ids: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<PendingTransferRecord>>>;

    fn upsert_collections(&self, rows: Vec<CollectionRecord>) -> BoxFuture<'_, Result<()>>;

    fn upsert_token_datas(&self, rows: Vec<TokenDataRecord>) -> BoxFuture<'_, Result<()>>;

    fn upsert_ownerships(&self, rows: Vec<OwnershipRecord>) -> BoxFuture<'_, Result<()>>;

    fn upsert_pending_transfers(
        &self,
        rows: Vec<PendingTransferRecord>,
    ) -> BoxFuture<'_, Result<()>>;

    fn upsert_token_properties(&self, rows: Vec<TokenPropertyRecord>)
        -> BoxFuture<'_, Result<()>>;

    fn upsert_activities(&self, rows: Vec<TokenActivityRecord>) -> BoxFuture<'_, Result<()>>;

    fn upsert_transfer_events(&self, rows: Vec<TransferEventRecord>)
        -> BoxFuture<'_, Result<()>>;

    fn upsert_token_metadata(&self, rows: Vec<TokenMetadataRecord>)
        -> BoxFuture<'_, Result<()>>;
}

pub trait ModuleStore: Send + Sync {
    fn upsert_modules(&self, rows: Vec<ModuleRecord>) -> BoxFuture<'_, Result<()>>;
}

pub trait StatusStore: Send + Sync {
    /// Inserts or replaces the row keyed by `(name, start_version)`.
    fn upsert_status(&self, status: ProcessorStatus) -> BoxFuture<'_, Result<()>>;

    /// Rows of `processor` that are not marked successful.
    fn failed_statuses<'a>(
        &'a self,
        processor: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ProcessorStatus>>>;
}
