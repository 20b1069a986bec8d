//! Sync audit log.
//!
//! Every queue item outcome is recorded here, in the same transaction as the
//! queue mutation. Items dropped after exhausting retries leave the queue but
//! not this log.

use rusqlite::{Connection, Result};
use serde::Serialize;

/// What happened to a queue item (or to a whole drain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Synced,
    Retried,
    Dropped,
    DrainCompleted,
}

impl AuditOutcome {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Retried => "retried",
            Self::Dropped => "dropped",
            Self::DrainCompleted => "drain_completed",
        }
    }
}

/// An audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: i64,
    pub item_id: Option<i64>,
    pub operation: Option<String>,
    pub outcome: AuditOutcome,
    pub retry_count: u32,
    pub error: Option<String>,
    pub created_at: i64,
}

impl AuditEvent {
    /// Create an event for a queue item (id will be assigned by database).
    #[must_use]
    pub fn for_item(item_id: i64, operation: &str, outcome: AuditOutcome, now_ms: i64) -> Self {
        Self {
            id: 0,
            item_id: Some(item_id),
            operation: Some(operation.to_string()),
            outcome,
            retry_count: 0,
            error: None,
            created_at: now_ms,
        }
    }

    /// Marker for a finished drain.
    #[must_use]
    pub fn drain_completed(now_ms: i64) -> Self {
        Self {
            id: 0,
            item_id: None,
            operation: None,
            outcome: AuditOutcome::DrainCompleted,
            retry_count: 0,
            error: None,
            created_at: now_ms,
        }
    }

    /// Attach the failure details.
    #[must_use]
    pub fn with_failure(mut self, retry_count: u32, error: &str) -> Self {
        self.retry_count = retry_count;
        self.error = Some(error.to_string());
        self
    }
}

/// Insert an event into the database.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_audit (item_id, operation, outcome, retry_count, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            event.item_id,
            event.operation,
            event.outcome.as_str(),
            event.retry_count,
            event.error,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent events, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn recent_events(conn: &Connection, limit: Option<u32>) -> Result<Vec<AuditEvent>> {
    let limit = limit.unwrap_or(100);
    let mut stmt = conn.prepare(
        "SELECT id, item_id, operation, outcome, retry_count, error, created_at
         FROM sync_audit
         ORDER BY created_at DESC, id DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map([limit], |row| {
        Ok(AuditEvent {
            id: row.get(0)?,
            item_id: row.get(1)?,
            operation: row.get(2)?,
            outcome: parse_outcome(row.get::<_, String>(3)?.as_str()),
            retry_count: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;

    rows.collect()
}

/// Number of events with `outcome` at or after `since_ms`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_since(conn: &Connection, outcome: AuditOutcome, since_ms: i64) -> Result<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM sync_audit WHERE outcome = ?1 AND created_at >= ?2",
        rusqlite::params![outcome.as_str(), since_ms],
        |row| row.get(0),
    )
}

/// Timestamp of the newest event with `outcome`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn latest(conn: &Connection, outcome: AuditOutcome) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT MAX(created_at) FROM sync_audit WHERE outcome = ?1",
        [outcome.as_str()],
        |row| row.get(0),
    )
}

fn parse_outcome(s: &str) -> AuditOutcome {
    match s {
        "synced" => AuditOutcome::Synced,
        "dropped" => AuditOutcome::Dropped,
        "drain_completed" => AuditOutcome::DrainCompleted,
        _ => AuditOutcome::Retried,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_schema;

    #[test]
    fn test_event_insert_and_count() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let dropped = AuditEvent::for_item(7, "create_alert", AuditOutcome::Dropped, 5_000)
            .with_failure(3, "Server rejected request with status 500");
        let id = insert_event(&conn, &dropped).unwrap();
        assert!(id > 0);

        assert_eq!(count_since(&conn, AuditOutcome::Dropped, 5_000).unwrap(), 1);
        assert_eq!(count_since(&conn, AuditOutcome::Dropped, 5_001).unwrap(), 0);
        assert_eq!(count_since(&conn, AuditOutcome::Synced, 0).unwrap(), 0);

        let events = recent_events(&conn, Some(10)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_id, Some(7));
        assert_eq!(events[0].retry_count, 3);
        assert_eq!(events[0].outcome, AuditOutcome::Dropped);
    }

    #[test]
    fn test_latest_drain() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        assert_eq!(latest(&conn, AuditOutcome::DrainCompleted).unwrap(), None);
        insert_event(&conn, &AuditEvent::drain_completed(100)).unwrap();
        insert_event(&conn, &AuditEvent::drain_completed(250)).unwrap();
        assert_eq!(latest(&conn, AuditOutcome::DrainCompleted).unwrap(), Some(250));
    }
}
