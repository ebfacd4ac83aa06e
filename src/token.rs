//! Token domain: event decoding, per-batch aggregation, and the monotonic
//! merge into stored token state.

pub mod aggregate;
pub mod classify;
pub mod events;
pub mod ids;
pub mod metadata;
pub mod processor;
pub mod reconciler;

pub use events::{TokenEvent, TokenEventRecord};
pub use ids::{collection_id, pending_id, TokenDataId, TokenId};
pub use metadata::{classify_uri, HttpMetadataFetcher, MetadataFetcher, TokenMetadata, UriSource};
pub use processor::{TokenProcessor, TOKEN_PROCESSOR_NAME};
pub use reconciler::{Changeset, EntityKind, ReconcileError, TokenReconciler};
