//! The offline data manager.
//!
//! One explicitly constructed owner of the store, the cache and the sync
//! queue. UI-facing callers only ever use this type: cache reads and writes,
//! enqueueing mutations, and plain collection access. Scheduling drains is
//! the coordinator's job.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheLayer;
use crate::clock::SharedClock;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::model::{Collection, OperationKind, Record, RecordKey};
use crate::storage::RecordStore;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use crate::sync::{
    Connectivity, Coordinator, DEFAULT_PRIORITY, HttpSyncApi, SyncApi, SyncBus, SyncProcessor,
    SyncQueue,
};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Row counts per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub collections: BTreeMap<Collection, usize>,
    pub total: usize,
}

/// Full JSON snapshot of the store.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSnapshot {
    /// RFC 3339 timestamp
    pub exported_at: String,
    /// Schema version of the exporting store
    pub version: i32,
    pub data: BTreeMap<Collection, Vec<serde_json::Value>>,
}

/// Sync health as reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub sync_in_progress: bool,
    pub queue_depth: usize,
    /// When the last drain finished (Unix milliseconds)
    pub last_sync: Option<i64>,
    pub dropped_last_24h: usize,
}

/// Owner of the local store and everything built on it.
#[derive(Debug, Clone)]
pub struct OfflineDataManager {
    store: RecordStore,
    cache: CacheLayer,
    queue: SyncQueue,
    settings: Settings,
}

impl OfflineDataManager {
    /// Build a manager over an open store.
    #[must_use]
    pub fn new(store: RecordStore, settings: Settings) -> Self {
        let cache = CacheLayer::new(store.clone(), settings.cache_ttls());
        let queue = SyncQueue::new(store.clone());
        Self {
            store,
            cache,
            queue,
            settings,
        }
    }

    /// Open (creating or upgrading) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid or the store cannot be opened.
    pub fn open(path: &Path, settings: Settings, clock: SharedClock) -> Result<Self> {
        settings.validate()?;
        Ok(Self::new(RecordStore::open(path, clock)?, settings))
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    #[must_use]
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ==================
    // Consumer Operations
    // ==================

    /// Cache a fetched response.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the write fails.
    pub fn put_cached(&self, key: &str, payload: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        self.cache.cache_response(key, payload, ttl)
    }

    /// A cached response, unless absent or expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn get_cached(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.cache.get_cached(key)
    }

    /// Queue a local mutation for the server. Returns the queue item id.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload has the wrong shape or the write fails.
    pub fn enqueue(
        &self,
        operation: OperationKind,
        payload: serde_json::Value,
        priority: Option<i64>,
    ) -> Result<i64> {
        self.queue
            .enqueue(operation, payload, priority.unwrap_or(DEFAULT_PRIORITY))
    }

    /// Write a document, applying the collection's cache TTL if it has one.
    ///
    /// The sync queue is not writable here; use [`Self::enqueue`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for the sync queue, or an error if the
    /// document is malformed or the write fails.
    pub fn put(&self, collection: Collection, doc: &serde_json::Value) -> Result<RecordKey> {
        ensure_writable(collection)?;
        self.cache.store_listing(collection, doc)
    }

    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<Record>> {
        self.store.get(collection, key)
    }

    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
        self.store.get_all(collection, None)
    }

    /// # Errors
    ///
    /// Returns an error if the delete aborts.
    pub fn delete(&self, collection: Collection, key: &RecordKey) -> Result<bool> {
        self.store.delete(collection, key)
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` for the sync queue, or an error if the
    /// delete aborts.
    pub fn clear(&self, collection: Collection) -> Result<usize> {
        ensure_writable(collection)?;
        self.store.clear(collection)
    }

    // ==================
    // Reporting
    // ==================

    /// Live row count per collection.
    ///
    /// # Errors
    ///
    /// Returns an error if a count fails.
    pub fn storage_stats(&self) -> Result<StorageStats> {
        let mut collections = BTreeMap::new();
        for collection in Collection::ALL {
            collections.insert(collection, self.store.count(collection)?);
        }
        let total = collections.values().sum();
        Ok(StorageStats { collections, total })
    }

    /// Snapshot every live document.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    pub fn export_data(&self) -> Result<ExportSnapshot> {
        let mut data = BTreeMap::new();
        for collection in Collection::ALL {
            let docs = self
                .store
                .get_all(collection, None)?
                .into_iter()
                .map(|r| r.data)
                .collect();
            data.insert(collection, docs);
        }

        let exported_at = chrono::DateTime::from_timestamp_millis(self.store.now_ms())
            .unwrap_or_default()
            .to_rfc3339();

        Ok(ExportSnapshot {
            exported_at,
            version: CURRENT_SCHEMA_VERSION,
            data,
        })
    }

    /// Current sync health.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    pub fn sync_status(&self, connectivity: &Connectivity, sync_in_progress: bool) -> Result<SyncStatus> {
        let now = self.store.now_ms();
        Ok(SyncStatus {
            is_online: connectivity.is_online(),
            sync_in_progress,
            queue_depth: self.queue.depth()?,
            last_sync: self.store.last_sync()?,
            dropped_last_24h: self.queue.count_dropped_since(now - DAY_MS)?,
        })
    }

    // ==================
    // Sync Wiring
    // ==================

    /// A processor over this manager's queue.
    #[must_use]
    pub fn processor<A: SyncApi>(&self, api: A) -> SyncProcessor<A> {
        SyncProcessor::new(self.queue.clone(), api, self.settings.processor_config())
    }

    /// The HTTP client configured by the settings.
    #[must_use]
    pub fn http_api(&self) -> HttpSyncApi {
        HttpSyncApi::new(&self.settings.api.base_url, self.settings.api_timeout())
    }

    /// A coordinator driving `processor`.
    #[must_use]
    pub fn coordinator<A: SyncApi + 'static>(
        &self,
        processor: Arc<SyncProcessor<A>>,
        connectivity: Connectivity,
        bus: SyncBus,
    ) -> Coordinator<A> {
        Coordinator::new(
            processor,
            self.cache.clone(),
            connectivity,
            bus,
            self.settings.sync_interval(),
        )
    }
}

/// Queue items only enter through `enqueue` and only leave through a drain.
fn ensure_writable(collection: Collection) -> Result<()> {
    if collection == Collection::SyncQueue {
        return Err(Error::InvalidArgument(
            "sync_queue is written through enqueue (`odm queue add`), not put or clear"
                .to_string(),
        ));
    }
    Ok(())
}
