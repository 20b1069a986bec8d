//! Read-through response cache.
//!
//! Entries live in the `api_cache` collection keyed by request identity and
//! carry an absolute expiry. Expired entries read as absent and are removed
//! by the read that meets them. A miss is never stored.

use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{Collection, RecordKey};
use crate::storage::RecordStore;

/// Time-to-live per cached collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub api_cache: Duration,
    pub tickets: Duration,
    pub events: Duration,
    pub notifications: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            api_cache: Duration::from_secs(15 * 60),
            tickets: Duration::from_secs(30 * 60),
            events: Duration::from_secs(2 * 60 * 60),
            notifications: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheTtls {
    /// Configured TTL for a collection, `None` for collections that never expire.
    #[must_use]
    pub const fn for_collection(&self, collection: Collection) -> Option<Duration> {
        match collection {
            Collection::ApiCache => Some(self.api_cache),
            Collection::Tickets => Some(self.tickets),
            Collection::Events => Some(self.events),
            Collection::Notifications => Some(self.notifications),
            Collection::Preferences
            | Collection::PendingAlerts
            | Collection::PendingAnalytics
            | Collection::SyncQueue => None,
        }
    }
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Cache operations over a shared store.
#[derive(Debug, Clone)]
pub struct CacheLayer {
    store: RecordStore,
    ttls: CacheTtls,
}

impl CacheLayer {
    #[must_use]
    pub fn new(store: RecordStore, ttls: CacheTtls) -> Self {
        Self { store, ttls }
    }

    #[must_use]
    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Cache a response under `key` until `now + ttl`.
    ///
    /// Without an explicit TTL the `api_cache` default applies.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the write fails.
    pub fn cache_response(&self, key: &str, payload: Value, ttl: Option<Duration>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("cache key must not be empty".to_string()));
        }

        let ttl = ttl.unwrap_or(self.ttls.api_cache);
        let now = self.store.now_ms();
        let expires_at = now.saturating_add(ttl_ms(ttl));

        let doc = json!({
            "url": key,
            "data": payload,
            "cached_at": now,
            "expires_at": expires_at,
        });
        self.store.put(Collection::ApiCache, &doc, Some(expires_at))?;

        debug!(key, ttl_secs = ttl.as_secs(), "Response cached");
        Ok(())
    }

    /// The cached payload for `key`, or `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn get_cached(&self, key: &str) -> Result<Option<Value>> {
        let record = self
            .store
            .get(Collection::ApiCache, &RecordKey::from(key))?;

        Ok(record.map(|mut r| {
            r.data
                .as_object_mut()
                .and_then(|obj| obj.remove("data"))
                .unwrap_or(Value::Null)
        }))
    }

    /// Store a fetched listing row with its collection's TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the write fails.
    pub fn store_listing(&self, collection: Collection, doc: &Value) -> Result<RecordKey> {
        let expires_at = self
            .ttls
            .for_collection(collection)
            .map(|ttl| self.store.now_ms().saturating_add(ttl_ms(ttl)));
        self.store.put(collection, doc, expires_at)
    }

    /// Eagerly delete expired rows from every collection.
    ///
    /// Returns the total number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if any purge fails.
    pub fn sweep_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for collection in Collection::ALL {
            removed += self.store.purge_expired(collection)?;
        }
        if removed > 0 {
            info!(removed, "Expired cache entries swept");
        }
        Ok(removed)
    }
}
