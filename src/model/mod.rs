//! Data models for the offline store.
//!
//! - Collection catalog (names, keys, secondary indices)
//! - Records and record keys
//! - Sync queue items and their operation kinds

pub mod collection;
pub mod queue_item;
pub mod record;

pub use collection::{Collection, IndexSpec, KeyKind};
pub use queue_item::{OperationKind, SyncQueueItem};
pub use record::{Record, RecordKey};
