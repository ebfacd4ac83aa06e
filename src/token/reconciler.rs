//! Monotonic merge of a batch aggregate into stored token state.
//!
//! Every net delta carries the highest version that produced it. A stored row
//! only moves forward when that version is strictly newer than the row's own
//! version, which makes replaying an already-applied batch a no-op.

use super::aggregate::{BatchAggregate, Rename};
use crate::store::{
    CollectionRecord, OwnershipKey, OwnershipRecord, PendingTransferRecord, TokenActivityRecord,
    TokenDataRecord, TokenPropertyRecord, TokenStore, TransferEventRecord,
};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    TokenData,
    Ownership,
    PendingTransfer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::TokenData => "token data",
            EntityKind::Ownership => "ownership",
            EntityKind::PendingTransfer => "pending transfer",
        };
        f.write_str(name)
    }
}

/// Violations of the ledger's own accounting. None of these heal on retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error(
        "supply of token data {token_data_id} would underflow at version {version}: stored {stored}, delta {delta}"
    )]
    SupplyUnderflow {
        token_data_id: String,
        version: u64,
        stored: i64,
        delta: i64,
    },
    #[error(
        "pending transfer {pending_id} of token {token_id} from {from} to {to} would be {amount} at version {version}"
    )]
    NegativeTransferAmount {
        pending_id: String,
        token_id: String,
        from: String,
        to: String,
        version: u64,
        amount: i64,
    },
    #[error("unknown {kind} {key} referenced at version {version}")]
    UnknownEntity {
        kind: EntityKind,
        key: String,
        version: u64,
    },
}

/// Rows to persist for one batch, grouped per table.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Changeset {
    pub collections: Vec<CollectionRecord>,
    pub token_datas: Vec<TokenDataRecord>,
    pub ownerships: Vec<OwnershipRecord>,
    pub pending_transfers: Vec<PendingTransferRecord>,
    pub token_properties: Vec<TokenPropertyRecord>,
    pub activities: Vec<TokenActivityRecord>,
    pub transfer_events: Vec<TransferEventRecord>,
}

impl Changeset {
    pub fn len(&self) -> usize {
        self.collections.len()
            + self.token_datas.len()
            + self.ownerships.len()
            + self.pending_transfers.len()
            + self.token_properties.len()
            + self.activities.len()
            + self.transfer_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct TokenReconciler {
    store: Arc<dyn TokenStore>,
}

impl TokenReconciler {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Merges `aggregate` against stored rows without writing anything.
    ///
    /// Accounting violations come back as a [`ReconcileError`] inside the
    /// `anyhow::Error`; storage failures keep their own context.
    pub async fn reconcile(&self, aggregate: BatchAggregate) -> Result<Changeset> {
        let BatchAggregate {
            collections,
            token_datas,
            supply,
            ownerships,
            pending,
            renames,
            properties,
            activities,
            transfer_events,
        } = aggregate;

        let collections = self.new_collections(collections).await?;
        let token_datas = self.merge_supply(token_datas, supply).await?;

        // Deltas on a renamed token id landed after the rename created the row.
        let (after_renames, before_renames): (BTreeMap<_, _>, BTreeMap<_, _>) =
            ownerships.into_iter().partition(|(key, change)| {
                renames.iter().any(|rename| {
                    rename.new_token_id == key.token_id && rename.version < change.delta.version
                })
            });
        let mut owned = OwnershipTable::default();
        self.merge_ownerships(&mut owned, before_renames).await?;
        self.apply_renames(&mut owned, &renames).await?;
        self.merge_ownerships(&mut owned, after_renames).await?;

        let pending_transfers = self.merge_pending(pending).await?;

        Ok(Changeset {
            collections,
            token_datas,
            ownerships: owned.into_changed(),
            pending_transfers,
            token_properties: properties,
            activities,
            transfer_events,
        })
    }

    /// Writes every category with one bulk call each. Returns the row count.
    pub async fn persist(&self, changeset: Changeset) -> Result<usize> {
        let rows = changeset.len();
        let Changeset {
            collections,
            token_datas,
            ownerships,
            pending_transfers,
            token_properties,
            activities,
            transfer_events,
        } = changeset;

        self.store
            .upsert_collections(collections)
            .await
            .context("failed to persist collections")?;
        self.store
            .upsert_token_datas(token_datas)
            .await
            .context("failed to persist token data")?;
        self.store
            .upsert_ownerships(ownerships)
            .await
            .context("failed to persist ownerships")?;
        self.store
            .upsert_pending_transfers(pending_transfers)
            .await
            .context("failed to persist pending transfers")?;
        self.store
            .upsert_token_properties(token_properties)
            .await
            .context("failed to persist token properties")?;
        self.store
            .upsert_activities(activities)
            .await
            .context("failed to persist token activities")?;
        self.store
            .upsert_transfer_events(transfer_events)
            .await
            .context("failed to persist transfer events")?;
        Ok(rows)
    }

    async fn new_collections(
        &self,
        seen: BTreeMap<String, CollectionRecord>,
    ) -> Result<Vec<CollectionRecord>> {
        if seen.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = seen.keys().cloned().collect();
        let existing: BTreeSet<String> = self
            .store
            .load_collections(&ids)
            .await
            .context("failed to load collections")?
            .into_iter()
            .map(|row| row.collection_id)
            .collect();

        Ok(seen
            .into_iter()
            .filter(|(id, _)| !existing.contains(id))
            .map(|(_, row)| row)
            .collect())
    }

    async fn merge_supply(
        &self,
        created: BTreeMap<String, TokenDataRecord>,
        supply: BTreeMap<String, super::aggregate::SupplyDelta>,
    ) -> Result<Vec<TokenDataRecord>> {
        let ids: Vec<String> = created
            .keys()
            .chain(supply.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let stored: BTreeMap<String, TokenDataRecord> = self
            .store
            .load_token_datas(&ids)
            .await
            .context("failed to load token data")?
            .into_iter()
            .map(|row| (row.token_data_id.clone(), row))
            .collect();

        // Stored rows win over creations seen again on replay.
        let mut fresh: BTreeMap<String, TokenDataRecord> = created
            .into_iter()
            .filter(|(id, _)| !stored.contains_key(id))
            .collect();
        let mut updated = Vec::new();

        for (token_data_id, change) in supply {
            let delta = change.delta;
            if let Some(row) = fresh.get_mut(&token_data_id) {
                apply_supply(row, delta.amount, delta.version)?;
                record_mints(row, change.minted);
                continue;
            }

            let Some(row) = stored.get(&token_data_id) else {
                return Err(ReconcileError::UnknownEntity {
                    kind: EntityKind::TokenData,
                    key: token_data_id,
                    version: delta.version,
                }
                .into());
            };
            if delta.version <= row.version {
                tracing::debug!(
                    token_data_id = %token_data_id,
                    stored_version = row.version,
                    version = delta.version,
                    "skipping stale supply delta"
                );
                continue;
            }

            let mut row = row.clone();
            apply_supply(&mut row, delta.amount, delta.version)?;
            record_mints(&mut row, change.minted);
            updated.push(row);
        }

        let mut rows: Vec<TokenDataRecord> = fresh.into_values().collect();
        rows.extend(updated);
        Ok(rows)
    }

    async fn merge_ownerships(
        &self,
        table: &mut OwnershipTable,
        deltas: BTreeMap<OwnershipKey, super::aggregate::OwnershipDelta>,
    ) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let keys: Vec<OwnershipKey> = deltas.keys().cloned().collect();
        table.load(self.store.load_ownerships(&keys).await.context("failed to load ownerships")?);

        for (key, change) in deltas {
            let delta = change.delta;
            match table.rows.get_mut(&key) {
                Some(row) if delta.version <= row.version => {
                    tracing::debug!(
                        token_id = %key.token_id,
                        owner = %key.owner,
                        stored_version = row.version,
                        version = delta.version,
                        "skipping stale ownership delta"
                    );
                }
                Some(row) => {
                    row.amount = row.amount.saturating_add(delta.amount);
                    row.version = delta.version;
                    table.changed.insert(key);
                }
                None if delta.amount < 0 => {
                    return Err(ReconcileError::UnknownEntity {
                        kind: EntityKind::Ownership,
                        key: format!("{}/{}", key.token_id, key.owner),
                        version: delta.version,
                    }
                    .into());
                }
                None => {
                    table.rows.insert(
                        key.clone(),
                        OwnershipRecord {
                            token_id: key.token_id.clone(),
                            token_data_id: change.token_data_id,
                            owner: key.owner.clone(),
                            amount: delta.amount,
                            version: delta.version,
                        },
                    );
                    table.changed.insert(key);
                }
            }
        }
        Ok(())
    }

    async fn apply_renames(&self, table: &mut OwnershipTable, renames: &[Rename]) -> Result<()> {
        if renames.is_empty() {
            return Ok(());
        }
        let mut renames = renames.to_vec();
        renames.sort_by_key(|rename| rename.version);

        let old_ids: Vec<String> = renames
            .iter()
            .map(|rename| rename.old_token_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let holders = self
            .store
            .load_ownerships_by_token(&old_ids)
            .await
            .context("failed to load ownerships of renamed tokens")?;
        table.load(holders);

        for rename in &renames {
            let sources: Vec<OwnershipKey> = table
                .rows
                .iter()
                .filter(|(key, row)| {
                    key.token_id == rename.old_token_id && row.version < rename.version
                })
                .map(|(key, _)| key.clone())
                .collect();

            let targets: Vec<OwnershipKey> = sources
                .iter()
                .map(|key| OwnershipKey::new(rename.new_token_id.clone(), key.owner.clone()))
                .filter(|key| !table.rows.contains_key(key))
                .collect();
            if !targets.is_empty() {
                let existing = self
                    .store
                    .load_ownerships(&targets)
                    .await
                    .context("failed to load ownerships of renamed tokens")?;
                table.load(existing);
            }

            for source in sources {
                let Some(row) = table.rows.get_mut(&source) else {
                    continue;
                };
                let moved = row.amount;
                row.amount = 0;
                row.version = rename.version;
                table.changed.insert(source.clone());

                let target = OwnershipKey::new(rename.new_token_id.clone(), source.owner.clone());
                let entry = table
                    .rows
                    .entry(target.clone())
                    .or_insert_with(|| OwnershipRecord {
                        token_id: rename.new_token_id.clone(),
                        token_data_id: rename.new_token_data_id.clone(),
                        owner: source.owner.clone(),
                        amount: 0,
                        version: rename.version,
                    });
                entry.amount = entry.amount.saturating_add(moved);
                entry.version = entry.version.max(rename.version);
                table.changed.insert(target);
            }
        }
        Ok(())
    }

    async fn merge_pending(
        &self,
        deltas: BTreeMap<String, super::aggregate::PendingDelta>,
    ) -> Result<Vec<PendingTransferRecord>> {
        if deltas.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = deltas.keys().cloned().collect();
        let stored: BTreeMap<String, PendingTransferRecord> = self
            .store
            .load_pending_transfers(&ids)
            .await
            .context("failed to load pending transfers")?
            .into_iter()
            .map(|row| (row.pending_id.clone(), row))
            .collect();

        let mut rows = Vec::new();
        for (pending_id, change) in deltas {
            let delta = change.delta;
            let current = match stored.get(&pending_id) {
                Some(row) if delta.version <= row.version => {
                    tracing::debug!(
                        pending_id = %pending_id,
                        stored_version = row.version,
                        version = delta.version,
                        "skipping stale pending transfer delta"
                    );
                    continue;
                }
                Some(row) => row.amount,
                None => 0,
            };

            let amount = current.saturating_add(delta.amount);
            if amount < 0 {
                return Err(ReconcileError::NegativeTransferAmount {
                    pending_id,
                    token_id: change.token_id,
                    from: change.from,
                    to: change.to,
                    version: delta.version,
                    amount,
                }
                .into());
            }
            rows.push(PendingTransferRecord {
                pending_id,
                token_id: change.token_id,
                from: change.from,
                to: change.to,
                amount,
                version: delta.version,
                timestamp: change.timestamp,
            });
        }
        Ok(rows)
    }
}

fn apply_supply(row: &mut TokenDataRecord, delta: i64, version: u64) -> Result<()> {
    let supply = row.supply.saturating_add(delta);
    if supply < 0 {
        return Err(ReconcileError::SupplyUnderflow {
            token_data_id: row.token_data_id.clone(),
            version,
            stored: row.supply,
            delta,
        }
        .into());
    }
    row.supply = supply;
    row.version = row.version.max(version);
    Ok(())
}

fn record_mints(row: &mut TokenDataRecord, minted: Option<(u64, u64)>) {
    if let Some((first, last)) = minted {
        row.minted_at = Some(row.minted_at.unwrap_or(first));
        row.last_minted_at = Some(row.last_minted_at.map_or(last, |prev| prev.max(last)));
    }
}

/// Working copy of the ownership rows touched by a batch.
#[derive(Debug, Default)]
struct OwnershipTable {
    rows: BTreeMap<OwnershipKey, OwnershipRecord>,
    changed: BTreeSet<OwnershipKey>,
}

impl OwnershipTable {
    /// Adds stored rows without overwriting rows already in the working copy.
    fn load(&mut self, rows: Vec<OwnershipRecord>) {
        for row in rows {
            self.rows.entry(row.key()).or_insert(row);
        }
    }

    fn into_changed(mut self) -> Vec<OwnershipRecord> {
        self.changed
            .iter()
            .filter_map(|key| self.rows.remove(key))
            .collect()
    }
}
