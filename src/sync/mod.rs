//! Outbound synchronization.
//!
//! Local mutations are queued durably and replayed to the server once
//! connectivity allows:
//!
//! - **Queue**: priority-ordered durable log with retry accounting
//! - **Api**: the server boundary, one call per operation kind
//! - **Processor**: single-flight drain of one batch, strictly sequential
//! - **Connectivity**: online/visible state fed by the host
//! - **Coordinator**: turns triggers into drains and announces them to siblings
//!
//! # Example
//!
//! ```ignore
//! use odm::sync::{Coordinator, Connectivity, HttpSyncApi, SyncBus, SyncProcessor};
//!
//! let processor = Arc::new(SyncProcessor::new(queue, HttpSyncApi::new(url, timeout), config));
//! let coordinator = Coordinator::new(processor, cache, connectivity.clone(), SyncBus::default(), interval);
//! tokio::spawn(coordinator.run(shutdown_rx));
//! connectivity.set_online(true); // triggers a drain
//! ```

pub mod api;
pub mod connectivity;
pub mod coordinator;
pub mod processor;
pub mod queue;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{HttpSyncApi, SyncApi};
pub use connectivity::Connectivity;
pub use coordinator::{Coordinator, SyncBus, SyncSignal, TriggerHandle};
pub use processor::{DrainOutcome, DrainStats, ProcessorConfig, SyncProcessor};
pub use queue::{DEFAULT_PRIORITY, FailureOutcome, SyncQueue};
