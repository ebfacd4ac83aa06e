//! Durable progress tracking: a key-value cache contract, its in-memory and
//! fjall-backed implementations, and the typed store that maps processor
//! names and chain ids onto cache keys.

pub mod cache;
pub mod persistent;
pub mod store;

pub use cache::{CheckpointCache, MemoryCheckpointCache};
pub use persistent::FjallCheckpointCache;
pub use store::{checkpoint_key, CheckpointStore, LEDGER_INFO_KEY};
