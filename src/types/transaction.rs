use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ledger transaction categories. Unknown wire values are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    User,
    Genesis,
    BlockMetadata,
    StateCheckpoint,
    Other(String),
}

impl TransactionKind {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "user_transaction" => Self::User,
            "genesis_transaction" => Self::Genesis,
            "block_metadata_transaction" => Self::BlockMetadata,
            "state_checkpoint_transaction" => Self::StateCheckpoint,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::User => "user_transaction",
            Self::Genesis => "genesis_transaction",
            Self::BlockMetadata => "block_metadata_transaction",
            Self::StateCheckpoint => "state_checkpoint_transaction",
            Self::Other(other) => other.as_str(),
        }
    }
}

/// An immutable, versioned unit of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u64,
    pub kind: TransactionKind,
    pub hash: String,
    pub success: bool,
    pub vm_status: String,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    pub sender: Option<String>,
    pub payload: Option<TransactionPayload>,
    pub events: Vec<Event>,
}

impl Transaction {
    /// Only successful user-submitted transactions feed the processors.
    pub fn is_indexable(&self) -> bool {
        self.success && self.kind == TransactionKind::User
    }

    pub fn sender_or_default(&self) -> &str {
        self.sender.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub kind: String,
    /// Entry function id for `entry_function_payload`, e.g. `0x1::code::publish_package_txn`.
    pub function: Option<String>,
    pub arguments: Vec<Value>,
    pub modules: Vec<ModuleBytecode>,
}

impl TransactionPayload {
    pub const MODULE_BUNDLE: &'static str = "module_bundle_payload";
    pub const ENTRY_FUNCTION: &'static str = "entry_function_payload";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleBytecode {
    pub bytecode: String,
    pub abi: Option<ModuleAbi>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAbi {
    pub address: String,
    pub name: String,
    pub friends: Vec<String>,
    pub exposed_function_count: usize,
    pub struct_count: usize,
}

/// A single emitted event. `data` stays opaque until a reconciler decodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    pub sequence_number: u64,
    pub type_tag: String,
    pub data: Value,
}

/// Hex chars encoding the creation number that prefixes an event handle key.
const CREATION_NUMBER_HEX_LEN: usize = 16;

impl Event {
    /// Account that owns the event handle.
    ///
    /// Handle keys are `0x` + 8 little-endian creation-number bytes + the
    /// 32-byte account address, all hex encoded.
    pub fn account_address(&self) -> Option<String> {
        let raw = self.key.strip_prefix("0x").unwrap_or(&self.key);
        if raw.len() <= CREATION_NUMBER_HEX_LEN || !raw.is_ascii() {
            return None;
        }
        let address = &raw[CREATION_NUMBER_HEX_LEN..];
        if !address.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(format!("0x{address}"))
    }
}
