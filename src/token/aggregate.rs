//! Folds the classified events of one batch into per-key net deltas.

use super::classify::ClassifiedTransaction;
use super::events::{TokenEvent, TokenEventRecord, TransferOffer};
use super::ids::{collection_id, pending_id};
use crate::store::{
    CollectionRecord, OwnershipKey, TokenActivityRecord, TokenDataRecord, TokenPropertyRecord,
    TransferEventKind, TransferEventRecord,
};
use std::collections::BTreeMap;

/// Net signed change of one key plus the highest version that contributed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delta {
    pub amount: i64,
    pub version: u64,
}

impl Delta {
    fn new(version: u64) -> Self {
        Self { amount: 0, version }
    }

    fn add(&mut self, amount: i64, version: u64) {
        self.amount = self.amount.saturating_add(amount);
        self.version = self.version.max(version);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipDelta {
    pub token_data_id: String,
    pub delta: Delta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplyDelta {
    pub delta: Delta,
    /// First and last version of a mint in this batch.
    pub minted: Option<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelta {
    pub token_id: String,
    pub from: String,
    pub to: String,
    pub delta: Delta,
    pub timestamp: u64,
}

/// A property-map mutation that may move balances to a new token id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub old_token_id: String,
    pub new_token_id: String,
    pub new_token_data_id: String,
    pub version: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchAggregate {
    pub collections: BTreeMap<String, CollectionRecord>,
    pub token_datas: BTreeMap<String, TokenDataRecord>,
    pub supply: BTreeMap<String, SupplyDelta>,
    pub ownerships: BTreeMap<OwnershipKey, OwnershipDelta>,
    pub pending: BTreeMap<String, PendingDelta>,
    pub renames: Vec<Rename>,
    pub properties: Vec<TokenPropertyRecord>,
    pub activities: Vec<TokenActivityRecord>,
    pub transfer_events: Vec<TransferEventRecord>,
}

impl BatchAggregate {
    /// `transactions` must be in ascending version order.
    pub fn from_classified(transactions: &[ClassifiedTransaction]) -> Self {
        let mut aggregate = Self::default();
        for tx in transactions {
            for record in &tx.events {
                aggregate.fold(tx, record);
            }
        }
        aggregate
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
            && self.token_datas.is_empty()
            && self.supply.is_empty()
            && self.ownerships.is_empty()
            && self.pending.is_empty()
            && self.renames.is_empty()
            && self.properties.is_empty()
            && self.activities.is_empty()
            && self.transfer_events.is_empty()
    }

    fn fold(&mut self, tx: &ClassifiedTransaction, record: &TokenEventRecord) {
        let version = tx.version;
        let account = record.account.as_str();

        match &record.event {
            TokenEvent::Withdraw(event) => {
                let token_id = event.id.hash_id();
                let token_data_id = event.id.token_data_id.hash_id();
                let amount = -signed(event.amount);
                self.add_ownership(&token_id, &token_data_id, account, amount, version);
                self.push_activity(tx, record, &token_id, event.amount, Some(account), None);
            }
            TokenEvent::Deposit(event) => {
                let token_id = event.id.hash_id();
                let token_data_id = event.id.token_data_id.hash_id();
                let amount = signed(event.amount);
                self.add_ownership(&token_id, &token_data_id, account, amount, version);
                self.push_activity(tx, record, &token_id, event.amount, None, Some(account));
            }
            TokenEvent::Mint(event) => {
                let token_data_id = event.id.hash_id();
                let supply = self.supply_entry(&token_data_id, version);
                supply.delta.add(signed(event.amount), version);
                supply.minted = Some(match supply.minted {
                    Some((first, _)) => (first, version),
                    None => (version, version),
                });
                self.push_activity(tx, record, &token_data_id, event.amount, None, Some(account));
            }
            TokenEvent::Burn(event) => {
                let token_data_id = event.id.token_data_id.hash_id();
                self.supply_entry(&token_data_id, version)
                    .delta
                    .add(-signed(event.amount), version);
                let token_id = event.id.hash_id();
                self.push_activity(tx, record, &token_id, event.amount, Some(account), None);
            }
            TokenEvent::CreateTokenData(event) => {
                let token_data_id = event.id.hash_id();
                self.token_datas
                    .entry(token_data_id.clone())
                    .or_insert_with(|| TokenDataRecord {
                        token_data_id: token_data_id.clone(),
                        creator: event.id.creator.clone(),
                        collection: event.id.collection.clone(),
                        name: event.id.name.clone(),
                        description: event.description.clone(),
                        uri: event.uri.clone(),
                        maximum: event.maximum,
                        supply: 0,
                        royalty_payee_address: event.royalty_payee_address.clone(),
                        royalty_points_numerator: event.royalty_points_numerator,
                        royalty_points_denominator: event.royalty_points_denominator,
                        property_keys: event.property_keys.clone(),
                        property_values: event.property_values.clone(),
                        property_types: event.property_types.clone(),
                        minted_at: None,
                        last_minted_at: None,
                        version,
                        timestamp: tx.timestamp,
                    });
                self.push_activity(tx, record, &token_data_id, 0, None, None);
            }
            TokenEvent::CreateCollection(event) => {
                let id = collection_id(&event.creator, &event.collection_name);
                self.collections
                    .entry(id.clone())
                    .or_insert_with(|| CollectionRecord {
                        collection_id: id.clone(),
                        creator: event.creator.clone(),
                        name: event.collection_name.clone(),
                        description: event.description.clone(),
                        uri: event.uri.clone(),
                        maximum: event.maximum,
                        version,
                        timestamp: tx.timestamp,
                    });
                self.push_activity(tx, record, &id, 0, None, None);
            }
            TokenEvent::MutateProperties(event) => {
                let old_token_id = event.old_id.hash_id();
                let new_token_id = event.new_id.hash_id();
                self.properties.push(TokenPropertyRecord {
                    token_id: new_token_id.clone(),
                    previous_token_id: old_token_id.clone(),
                    keys: event.keys.clone(),
                    values: event.values.clone(),
                    types: event.types.clone(),
                    version,
                    timestamp: tx.timestamp,
                });
                if old_token_id != new_token_id {
                    self.renames.push(Rename {
                        old_token_id,
                        new_token_id: new_token_id.clone(),
                        new_token_data_id: event.new_id.token_data_id.hash_id(),
                        version,
                    });
                }
                self.push_activity(tx, record, &new_token_id, 0, None, None);
            }
            TokenEvent::Offer(offer) => {
                self.add_pending(tx, account, offer, signed(offer.amount));
                let token_id = offer.token_id.hash_id();
                let to = Some(offer.to_address.as_str());
                self.push_activity(tx, record, &token_id, offer.amount, Some(account), to);
            }
            TokenEvent::Claim(offer) | TokenEvent::CancelOffer(offer) => {
                self.add_pending(tx, account, offer, -signed(offer.amount));
                let token_id = offer.token_id.hash_id();
                let to = Some(offer.to_address.as_str());
                self.push_activity(tx, record, &token_id, offer.amount, Some(account), to);
            }
            TokenEvent::Listing(listing) => {
                let token_id = listing.token_id.hash_id();
                self.transfer_events.push(TransferEventRecord {
                    event_key: record.key.clone(),
                    sequence_number: record.sequence_number,
                    version,
                    kind: TransferEventKind::Listing,
                    token_id: token_id.clone(),
                    seller: account.to_string(),
                    buyer: None,
                    coin_type: listing.coin_type_info.type_tag(),
                    token_amount: listing.amount,
                    coin_amount: None,
                    min_price: Some(listing.min_price),
                    locked_until_secs: Some(listing.locked_until_secs),
                    timestamp: tx.timestamp,
                });
                self.push_activity(tx, record, &token_id, listing.amount, Some(account), None);
            }
            TokenEvent::Swap(swap) => {
                let token_id = swap.token_id.hash_id();
                self.transfer_events.push(TransferEventRecord {
                    event_key: record.key.clone(),
                    sequence_number: record.sequence_number,
                    version,
                    kind: TransferEventKind::Swap,
                    token_id: token_id.clone(),
                    seller: account.to_string(),
                    buyer: Some(swap.token_buyer.clone()),
                    coin_type: swap.coin_type_info.type_tag(),
                    token_amount: swap.token_amount,
                    coin_amount: Some(swap.coin_amount),
                    min_price: None,
                    locked_until_secs: None,
                    timestamp: tx.timestamp,
                });
                let buyer = Some(swap.token_buyer.as_str());
                self.push_activity(tx, record, &token_id, swap.token_amount, Some(account), buyer);
            }
        }
    }

    fn add_ownership(
        &mut self,
        token_id: &str,
        token_data_id: &str,
        owner: &str,
        amount: i64,
        version: u64,
    ) {
        self.ownerships
            .entry(OwnershipKey::new(token_id, owner))
            .or_insert_with(|| OwnershipDelta {
                token_data_id: token_data_id.to_string(),
                delta: Delta::new(version),
            })
            .delta
            .add(amount, version);
    }

    fn supply_entry(&mut self, token_data_id: &str, version: u64) -> &mut SupplyDelta {
        self.supply
            .entry(token_data_id.to_string())
            .or_insert_with(|| SupplyDelta {
                delta: Delta::new(version),
                minted: None,
            })
    }

    fn add_pending(
        &mut self,
        tx: &ClassifiedTransaction,
        from: &str,
        offer: &TransferOffer,
        amount: i64,
    ) {
        let token_id = offer.token_id.hash_id();
        let id = pending_id(&token_id, from, &offer.to_address);
        let entry = self.pending.entry(id).or_insert_with(|| PendingDelta {
            token_id,
            from: from.to_string(),
            to: offer.to_address.clone(),
            delta: Delta::new(tx.version),
            timestamp: tx.timestamp,
        });
        entry.delta.add(amount, tx.version);
        entry.timestamp = entry.timestamp.max(tx.timestamp);
    }

    fn push_activity(
        &mut self,
        tx: &ClassifiedTransaction,
        record: &TokenEventRecord,
        token_id: &str,
        amount: u64,
        from: Option<&str>,
        to: Option<&str>,
    ) {
        self.activities.push(TokenActivityRecord {
            event_key: record.key.clone(),
            sequence_number: record.sequence_number,
            version: tx.version,
            event_type: record.type_tag.clone(),
            token_id: token_id.to_string(),
            amount,
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            caller: tx.sender.clone(),
            timestamp: tx.timestamp,
        });
    }
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}
