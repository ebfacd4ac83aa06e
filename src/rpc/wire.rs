//! JSON shapes returned by the ledger node REST API and their conversion into
//! the crate's domain types. 64-bit integers travel as quoted strings.

use crate::types::{
    Event, LedgerInfo, ModuleAbi, ModuleBytecode, Transaction, TransactionKind,
    TransactionPayload,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts `"123"` as well as `123`, which the node uses interchangeably across versions.
pub(crate) fn u64_from_str_or_num<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(value) => Ok(value),
        Raw::Str(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn opt_u64_from_str_or_num<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "u64_from_str_or_num")] u64);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(value)| value))
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireLedgerInfo {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    chain_id: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    epoch: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    ledger_version: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    oldest_ledger_version: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    ledger_timestamp: u64,
    #[serde(default, deserialize_with = "opt_u64_from_str_or_num")]
    block_height: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64_from_str_or_num")]
    oldest_block_height: Option<u64>,
    #[serde(default)]
    node_role: String,
}

impl From<WireLedgerInfo> for LedgerInfo {
    fn from(wire: WireLedgerInfo) -> Self {
        Self {
            chain_id: wire.chain_id,
            epoch: wire.epoch,
            ledger_version: wire.ledger_version,
            oldest_ledger_version: wire.oldest_ledger_version,
            ledger_timestamp: wire.ledger_timestamp,
            block_height: wire.block_height.unwrap_or_default(),
            oldest_block_height: wire.oldest_block_height.unwrap_or_default(),
            node_role: wire.node_role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTransaction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    version: u64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    vm_status: String,
    #[serde(default, deserialize_with = "opt_u64_from_str_or_num")]
    timestamp: Option<u64>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    payload: Option<WirePayload>,
    #[serde(default)]
    events: Vec<WireEvent>,
}

impl From<WireTransaction> for Transaction {
    fn from(wire: WireTransaction) -> Self {
        Self {
            version: wire.version,
            kind: TransactionKind::from_wire(&wire.kind),
            hash: wire.hash,
            success: wire.success,
            vm_status: wire.vm_status,
            timestamp: wire.timestamp.unwrap_or_default(),
            sender: wire.sender,
            payload: wire.payload.map(Into::into),
            events: wire.events.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    modules: Vec<WireModule>,
}

impl From<WirePayload> for TransactionPayload {
    fn from(wire: WirePayload) -> Self {
        Self {
            kind: wire.kind,
            function: wire.function,
            arguments: wire.arguments,
            modules: wire.modules.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireModule {
    bytecode: String,
    #[serde(default)]
    abi: Option<WireModuleAbi>,
}

#[derive(Debug, Deserialize)]
struct WireModuleAbi {
    address: String,
    name: String,
    #[serde(default)]
    friends: Vec<String>,
    #[serde(default)]
    exposed_functions: Vec<Value>,
    #[serde(default)]
    structs: Vec<Value>,
}

impl From<WireModule> for ModuleBytecode {
    fn from(wire: WireModule) -> Self {
        Self {
            bytecode: wire.bytecode,
            abi: wire.abi.map(|abi| ModuleAbi {
                address: abi.address,
                name: abi.name,
                friends: abi.friends,
                exposed_function_count: abi.exposed_functions.len(),
                struct_count: abi.structs.len(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    guid: Option<WireEventGuid>,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    sequence_number: u64,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct WireEventGuid {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    creation_number: u64,
    account_address: String,
}

impl WireEventGuid {
    /// Rebuilds the legacy handle key: LE creation number then the padded address.
    fn to_key(&self) -> String {
        let address = self
            .account_address
            .strip_prefix("0x")
            .unwrap_or(&self.account_address);
        format!(
            "0x{}{:0>64}",
            hex::encode(self.creation_number.to_le_bytes()),
            address
        )
    }
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        let key = match (wire.key, wire.guid) {
            (Some(key), _) => key,
            (None, Some(guid)) => guid.to_key(),
            (None, None) => String::new(),
        };
        Self {
            key,
            sequence_number: wire.sequence_number,
            type_tag: wire.type_tag,
            data: wire.data,
        }
    }
}

/// Error body returned by the node for non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireApiError {
    #[serde(default)]
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) error_code: String,
}
