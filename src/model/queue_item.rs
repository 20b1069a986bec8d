//! Outbound sync operations and queue items.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The closed set of mutations that can be replayed to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateAlert,
    UpdatePreferences,
    TrackAnalytics,
    CreateNotification,
}

impl OperationKind {
    pub const ALL: [Self; 4] = [
        Self::CreateAlert,
        Self::UpdatePreferences,
        Self::TrackAnalytics,
        Self::CreateNotification,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateAlert => "create_alert",
            Self::UpdatePreferences => "update_preferences",
            Self::TrackAnalytics => "track_analytics",
            Self::CreateNotification => "create_notification",
        }
    }

    /// Server path this operation is POSTed to.
    #[must_use]
    pub const fn endpoint(&self) -> &'static str {
        match self {
            Self::CreateAlert => "/api/v1/alerts",
            Self::UpdatePreferences => "/api/v1/preferences",
            Self::TrackAnalytics => "/api/v1/analytics/events",
            Self::CreateNotification => "/api/v1/notifications",
        }
    }

    /// Check that a payload has the shape this operation sends.
    ///
    /// All payloads are JSON objects; analytics events must name their type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first mismatch.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), Error> {
        let Some(obj) = payload.as_object() else {
            return Err(Error::InvalidArgument(format!(
                "{} payload must be a JSON object",
                self.as_str()
            )));
        };

        if *self == Self::TrackAnalytics
            && !obj.get("event_type").is_some_and(serde_json::Value::is_string)
        {
            return Err(Error::InvalidArgument(
                "track_analytics payload requires a string `event_type`".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown operation: {s}")))
    }
}

/// A pending outbound mutation, as persisted in `sync_queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Store-assigned id
    pub id: i64,
    pub operation: OperationKind,
    pub payload: serde_json::Value,
    /// Higher runs first
    pub priority: i64,
    /// Enqueue time (Unix milliseconds), strictly increasing across the queue
    pub created_at: i64,
    /// Failed attempts so far; never decreases
    #[serde(default)]
    pub retry_count: u32,
    pub last_attempt: Option<i64>,
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    /// Whether enough time has passed since the last failure to try again.
    ///
    /// The wait grows linearly with the number of failures.
    #[must_use]
    pub fn is_due(&self, now_ms: i64, retry_delay_ms: u64) -> bool {
        match self.last_attempt {
            Some(last) if self.retry_count > 0 && retry_delay_ms > 0 => {
                let delay = i64::try_from(retry_delay_ms)
                    .unwrap_or(i64::MAX)
                    .saturating_mul(i64::from(self.retry_count));
                now_ms >= last.saturating_add(delay)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(retry_count: u32, last_attempt: Option<i64>) -> SyncQueueItem {
        SyncQueueItem {
            id: 1,
            operation: OperationKind::CreateAlert,
            payload: json!({"name": "Price Drop"}),
            priority: 1,
            created_at: 0,
            retry_count,
            last_attempt,
            last_error: None,
        }
    }

    #[test]
    fn test_operation_round_trips_through_str() {
        for op in OperationKind::ALL {
            assert_eq!(op.as_str().parse::<OperationKind>().unwrap(), op);
        }
        assert!("delete_everything".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_payload_shapes() {
        assert!(OperationKind::CreateAlert.validate_payload(&json!({"name": "x"})).is_ok());
        assert!(OperationKind::CreateAlert.validate_payload(&json!([1, 2])).is_err());
        assert!(OperationKind::TrackAnalytics.validate_payload(&json!({})).is_err());
        assert!(OperationKind::TrackAnalytics
            .validate_payload(&json!({"event_type": "page_view"}))
            .is_ok());
    }

    #[test]
    fn test_fresh_item_is_always_due() {
        assert!(item(0, None).is_due(0, 5_000));
    }

    #[test]
    fn test_retry_delay_grows_with_failures() {
        let failed_twice = item(2, Some(10_000));
        assert!(!failed_twice.is_due(19_999, 5_000));
        assert!(failed_twice.is_due(20_000, 5_000));
        assert!(failed_twice.is_due(10_000, 0));
    }
}
