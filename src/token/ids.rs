//! Token identities and the hashed string keys derived from them.

use super::events::de_u64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenDataId {
    pub creator: String,
    pub collection: String,
    pub name: String,
}

impl TokenDataId {
    pub fn new(
        creator: impl Into<String>,
        collection: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            creator: creator.into(),
            collection: collection.into(),
            name: name.into(),
        }
    }

    /// Lower-hex SHA-256 of the canonical JSON encoding.
    pub fn hash_id(&self) -> String {
        canonical_hash(self)
    }

    pub fn collection_id(&self) -> String {
        collection_id(&self.creator, &self.collection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId {
    pub token_data_id: TokenDataId,
    #[serde(deserialize_with = "de_u64")]
    pub property_version: u64,
}

impl TokenId {
    pub fn new(token_data_id: TokenDataId, property_version: u64) -> Self {
        Self {
            token_data_id,
            property_version,
        }
    }

    pub fn hash_id(&self) -> String {
        canonical_hash(self)
    }
}

pub fn collection_id(creator: &str, name: &str) -> String {
    format!("{creator}:{name}")
}

/// Key of an outstanding offer from `from` to `to` of `token_id` (already hashed).
pub fn pending_id(token_id: &str, from: &str, to: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token_id.as_bytes());
    hasher.update(from.as_bytes());
    hasher.update(to.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_hash<T: Serialize>(value: &T) -> String {
    // Plain structs of strings and integers always serialize.
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}
