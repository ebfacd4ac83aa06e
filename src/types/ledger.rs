use serde::{Deserialize, Serialize};

/// Chain metadata reported by the ledger node.
///
/// Persisted as JSON under the `ledger_info` checkpoint key so that a restart
/// can tell whether the node still serves the chain the indexed state came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerInfo {
    pub chain_id: u64,
    pub epoch: u64,
    pub ledger_version: u64,
    pub oldest_ledger_version: u64,
    pub ledger_timestamp: u64,
    pub block_height: u64,
    pub oldest_block_height: u64,
    pub node_role: String,
}

impl LedgerInfo {
    /// Latest version the node has committed.
    pub fn latest_version(&self) -> u64 {
        self.ledger_version
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
