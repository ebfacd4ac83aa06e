//! Domain model shared by the fetcher, the processor framework, and the
//! reconcilers: ledger transactions, events, and chain metadata.

pub mod ledger;
pub mod transaction;

pub use ledger::LedgerInfo;
pub use transaction::{
    Event, ModuleAbi, ModuleBytecode, Transaction, TransactionKind, TransactionPayload,
};
