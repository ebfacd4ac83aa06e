//! Row types persisted by the reconcilers and the processor framework.

use crate::token::metadata::{TokenMetadata, UriSource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    /// `creator:name`
    pub collection_id: String,
    pub creator: String,
    pub name: String,
    pub description: String,
    pub uri: String,
    pub maximum: u64,
    pub version: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDataRecord {
    pub token_data_id: String,
    pub creator: String,
    pub collection: String,
    pub name: String,
    pub description: String,
    pub uri: String,
    pub maximum: u64,
    /// Never negative once persisted.
    pub supply: i64,
    pub royalty_payee_address: String,
    pub royalty_points_numerator: u64,
    pub royalty_points_denominator: u64,
    pub property_keys: Vec<String>,
    pub property_values: Vec<String>,
    pub property_types: Vec<String>,
    pub minted_at: Option<u64>,
    pub last_minted_at: Option<u64>,
    /// Version of the last applied supply change, or of the creation.
    pub version: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnershipKey {
    pub token_id: String,
    pub owner: String,
}

impl OwnershipKey {
    pub fn new(token_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            owner: owner.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub token_id: String,
    pub token_data_id: String,
    pub owner: String,
    pub amount: i64,
    pub version: u64,
}

impl OwnershipRecord {
    pub fn key(&self) -> OwnershipKey {
        OwnershipKey::new(self.token_id.clone(), self.owner.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransferRecord {
    pub pending_id: String,
    pub token_id: String,
    pub from: String,
    pub to: String,
    /// Never negative once persisted.
    pub amount: i64,
    pub version: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPropertyRecord {
    pub token_id: String,
    pub previous_token_id: String,
    pub keys: Vec<String>,
    pub values: Vec<String>,
    pub types: Vec<String>,
    pub version: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenActivityRecord {
    pub event_key: String,
    pub sequence_number: u64,
    pub version: u64,
    pub event_type: String,
    /// Token id, or the token data id for creation and mint events.
    pub token_id: String,
    pub amount: u64,
    pub from: Option<String>,
    pub to: Option<String>,
    pub caller: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEventKind {
    Listing,
    Swap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEventRecord {
    pub event_key: String,
    pub sequence_number: u64,
    pub version: u64,
    pub kind: TransferEventKind,
    pub token_id: String,
    pub seller: String,
    pub buyer: Option<String>,
    pub coin_type: String,
    pub token_amount: u64,
    pub coin_amount: Option<u64>,
    pub min_price: Option<u64>,
    pub locked_until_secs: Option<u64>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadataRecord {
    pub token_data_id: String,
    pub uri: String,
    pub source: UriSource,
    pub metadata: TokenMetadata,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub address: String,
    pub name: String,
    pub version: u64,
    pub creator: String,
    pub bytecode_sha256: String,
    pub friends: Vec<String>,
    pub exposed_function_count: usize,
    pub struct_count: usize,
    pub timestamp: u64,
}

/// Audit row for one processing attempt over `[start_version, end_version]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStatus {
    pub name: String,
    pub start_version: u64,
    pub end_version: u64,
    pub success: bool,
    pub detail: Option<String>,
    /// Unix seconds.
    pub updated_at: u64,
}
