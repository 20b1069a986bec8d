//! Collection catalog.
//!
//! The store holds a fixed, closed set of collections. Each one pins its
//! primary key (a document field or a store-assigned auto id) and its
//! secondary indices, each read from a document field on write.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How a collection's primary key is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Taken from the named document field (or passed explicitly).
    Field(&'static str),
    /// Assigned by the store on insert and written back to `id`.
    AutoIncrement,
}

/// A secondary index: column name plus the document field it is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub path: &'static str,
}

impl IndexSpec {
    /// Indices over the row's own metadata rather than a document field.
    /// Their column is written from the row, not extracted from the document.
    #[must_use]
    pub fn is_row_column(&self) -> bool {
        matches!(self.name, "stored_at" | "expires_at")
    }
}

const TICKETS: &[IndexSpec] = &[
    IndexSpec { name: "event_id", path: "event_id" },
    IndexSpec { name: "price", path: "price" },
    IndexSpec { name: "updated_at", path: "updated_at" },
];

const EVENTS: &[IndexSpec] = &[
    IndexSpec { name: "date", path: "event_date" },
    IndexSpec { name: "venue", path: "venue_name" },
    IndexSpec { name: "sport", path: "sport_type" },
];

const NOTIFICATIONS: &[IndexSpec] = &[
    IndexSpec { name: "is_read", path: "is_read" },
    IndexSpec { name: "created_at", path: "created_at" },
    IndexSpec { name: "type", path: "type" },
];

const PREFERENCES: &[IndexSpec] = &[
    IndexSpec { name: "category", path: "category" },
    IndexSpec { name: "updated_at", path: "updated_at" },
];

const PENDING_ALERTS: &[IndexSpec] = &[
    IndexSpec { name: "created_at", path: "created_at" },
    IndexSpec { name: "sync_status", path: "sync_status" },
];

const PENDING_ANALYTICS: &[IndexSpec] = &[
    IndexSpec { name: "event_type", path: "event_type" },
    IndexSpec { name: "created_at", path: "created_at" },
];

const API_CACHE: &[IndexSpec] = &[
    IndexSpec { name: "expires_at", path: "expires_at" },
    IndexSpec { name: "created_at", path: "cached_at" },
];

const SYNC_QUEUE: &[IndexSpec] = &[
    IndexSpec { name: "priority", path: "priority" },
    IndexSpec { name: "created_at", path: "created_at" },
    IndexSpec { name: "retry_count", path: "retry_count" },
];

/// Named collections of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Tickets,
    Events,
    Notifications,
    Preferences,
    PendingAlerts,
    PendingAnalytics,
    ApiCache,
    SyncQueue,
}

impl Collection {
    /// Every collection, in catalog order.
    pub const ALL: [Self; 8] = [
        Self::Tickets,
        Self::Events,
        Self::Notifications,
        Self::Preferences,
        Self::PendingAlerts,
        Self::PendingAnalytics,
        Self::ApiCache,
        Self::SyncQueue,
    ];

    /// Table name in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::Events => "events",
            Self::Notifications => "notifications",
            Self::Preferences => "preferences",
            Self::PendingAlerts => "pending_alerts",
            Self::PendingAnalytics => "pending_analytics",
            Self::ApiCache => "api_cache",
            Self::SyncQueue => "sync_queue",
        }
    }

    #[must_use]
    pub const fn key_kind(&self) -> KeyKind {
        match self {
            Self::Tickets | Self::Events => KeyKind::Field("id"),
            Self::Preferences => KeyKind::Field("key"),
            Self::ApiCache => KeyKind::Field("url"),
            Self::Notifications
            | Self::PendingAlerts
            | Self::PendingAnalytics
            | Self::SyncQueue => KeyKind::AutoIncrement,
        }
    }

    /// Document field holding the primary key (`id` for auto-id collections).
    #[must_use]
    pub const fn key_field(&self) -> &'static str {
        match self.key_kind() {
            KeyKind::Field(field) => field,
            KeyKind::AutoIncrement => "id",
        }
    }

    /// Secondary indices maintained on every write.
    #[must_use]
    pub const fn indices(&self) -> &'static [IndexSpec] {
        match self {
            Self::Tickets => TICKETS,
            Self::Events => EVENTS,
            Self::Notifications => NOTIFICATIONS,
            Self::Preferences => PREFERENCES,
            Self::PendingAlerts => PENDING_ALERTS,
            Self::PendingAnalytics => PENDING_ANALYTICS,
            Self::ApiCache => API_CACHE,
            Self::SyncQueue => SYNC_QUEUE,
        }
    }

    /// Look up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&'static IndexSpec> {
        self.indices().iter().find(|i| i.name == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .or(match normalized.as_str() {
                "user_preferences" => Some(Self::Preferences),
                "alerts" => Some(Self::PendingAlerts),
                "analytics" => Some(Self::PendingAnalytics),
                "cache" => Some(Self::ApiCache),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidArgument(format!("unknown collection: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection_names_and_aliases() {
        assert_eq!("tickets".parse::<Collection>().unwrap(), Collection::Tickets);
        assert_eq!("sync-queue".parse::<Collection>().unwrap(), Collection::SyncQueue);
        assert_eq!("cache".parse::<Collection>().unwrap(), Collection::ApiCache);
        assert!("widgets".parse::<Collection>().is_err());
    }

    #[test]
    fn test_event_indices_read_renamed_fields() {
        let venue = Collection::Events.index("venue").unwrap();
        assert_eq!(venue.path, "venue_name");
        assert!(Collection::Events.index("venue_name").is_none());
    }

    #[test]
    fn test_key_fields() {
        assert_eq!(Collection::ApiCache.key_field(), "url");
        assert_eq!(Collection::Preferences.key_field(), "key");
        assert_eq!(Collection::SyncQueue.key_kind(), KeyKind::AutoIncrement);
    }

    #[test]
    fn test_catalog_is_static() {
        const CACHE_INDICES: &[IndexSpec] = Collection::ApiCache.indices();
        assert_eq!(CACHE_INDICES.len(), 2);
        assert_eq!(Collection::Tickets.indices().len(), 3);
        assert_eq!(Collection::Preferences.indices().len(), 2);
    }

    #[test]
    fn test_cache_expiry_index_is_a_row_column() {
        let expires = Collection::ApiCache.index("expires_at").unwrap();
        assert!(expires.is_row_column());
        assert!(!Collection::ApiCache.index("created_at").unwrap().is_row_column());
    }
}
