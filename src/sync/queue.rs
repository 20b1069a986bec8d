//! Durable outbound queue.
//!
//! Items are rows of the `sync_queue` collection, processed by priority
//! (highest first) then enqueue time (oldest first). Every outcome is
//! written to the audit log in the same transaction as the queue change.

use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::model::{Collection, OperationKind, Record, RecordKey, SyncQueueItem};
use crate::storage::sqlite::{delete_in, get_in, put_in};
use crate::storage::{AuditEvent, AuditOutcome, OrderBy, RecordStore};

/// Default priority for enqueued items.
pub const DEFAULT_PRIORITY: i64 = 1;

/// What `record_failure` did with the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Kept for another attempt.
    Retried { retry_count: u32 },
    /// Removed after reaching the retry bound.
    Dropped { retry_count: u32 },
}

/// Queue operations over a shared store.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: RecordStore,
}

impl SyncQueue {
    #[must_use]
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Append an operation. Returns the assigned item id.
    ///
    /// `created_at` is strictly increasing across the queue even when the
    /// clock stalls or steps backwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a payload of the wrong shape, otherwise
    /// only store failures.
    pub fn enqueue(
        &self,
        operation: OperationKind,
        payload: serde_json::Value,
        priority: i64,
    ) -> Result<i64> {
        operation.validate_payload(&payload)?;

        let id = self.store.mutate("enqueue", |tx, ctx| {
            let newest: Option<i64> = tx
                .query_row("SELECT MAX(\"created_at\") FROM sync_queue", [], |row| {
                    row.get(0)
                })
                .map_err(StoreError::from)?;
            let created_at = newest.map_or(ctx.now, |n| ctx.now.max(n + 1));

            let doc = json!({
                "operation": operation,
                "payload": payload,
                "priority": priority,
                "created_at": created_at,
                "retry_count": 0,
                "last_attempt": null,
                "last_error": null,
            });
            let key = put_in(tx, Collection::SyncQueue, &doc, ctx.now, None)?;
            key.as_int().ok_or_else(|| {
                StoreError::InvalidRecord(format!("sync queue assigned non-integer id {key}")).into()
            })
        })?;

        info!(operation = %operation, item_id = id, priority, "Operation queued for sync");
        Ok(id)
    }

    /// Up to `max` items in processing order.
    ///
    /// Rows that no longer parse as queue items are removed and audited as
    /// dropped, so one bad row cannot stall the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan or a removal fails.
    pub fn peek_batch(&self, max: usize) -> Result<Vec<SyncQueueItem>> {
        let records = self.store.scan_ordered(
            Collection::SyncQueue,
            &[OrderBy::desc("priority"), OrderBy::asc("created_at")],
            Some(max),
        )?;

        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key.clone();
            let operation = record
                .data
                .get("operation")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            match item_from_record(record) {
                Ok(item) => items.push(item),
                Err(e) => self.discard_malformed(&key, &operation, &e.to_string())?,
            }
        }
        Ok(items)
    }

    fn discard_malformed(&self, key: &RecordKey, operation: &str, error: &str) -> Result<()> {
        self.store.mutate("discard_malformed", |tx, ctx| {
            if delete_in(tx, Collection::SyncQueue, key)? > 0 {
                let id = key.as_int().unwrap_or_default();
                ctx.record(
                    AuditEvent::for_item(id, operation, AuditOutcome::Dropped, ctx.now)
                        .with_failure(0, error),
                );
            }
            Ok(())
        })?;
        warn!(item_id = %key, operation, error, "Malformed sync item discarded");
        Ok(())
    }

    /// Fetch one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored item is malformed.
    pub fn get(&self, id: i64) -> Result<Option<SyncQueueItem>> {
        self.store
            .get(Collection::SyncQueue, &RecordKey::Int(id))?
            .map(item_from_record)
            .transpose()
    }

    /// Remove an item that was applied remotely. Removing an absent item is
    /// not an error.
    ///
    /// Returns whether the item was still queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete aborts.
    pub fn remove(&self, id: i64) -> Result<bool> {
        let removed = self.store.mutate("remove", |tx, ctx| {
            let Some(item) = load_item(tx, id)? else {
                return Ok(false);
            };
            delete_in(tx, Collection::SyncQueue, &RecordKey::Int(id))?;
            let mut event =
                AuditEvent::for_item(id, item.operation.as_str(), AuditOutcome::Synced, ctx.now);
            event.retry_count = item.retry_count;
            ctx.record(event);
            Ok(true)
        })?;

        if removed {
            debug!(item_id = id, "Sync item removed");
        }
        Ok(removed)
    }

    /// Account for a failed attempt.
    ///
    /// Increments `retry_count` and stamps `last_attempt`/`last_error`. Once
    /// the count reaches `max_retries` the item is deleted instead.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the item is no longer queued, or a store error.
    pub fn record_failure(&self, id: i64, error: &str, max_retries: u32) -> Result<FailureOutcome> {
        let (operation, outcome) = self.store.mutate("record_failure", |tx, ctx| {
            let Some(mut item) = load_item(tx, id)? else {
                return Err(StoreError::NotFound {
                    collection: Collection::SyncQueue.to_string(),
                    key: id.to_string(),
                }
                .into());
            };

            item.retry_count = item.retry_count.saturating_add(1);
            item.last_attempt = Some(ctx.now);
            item.last_error = Some(error.to_string());

            let outcome = if item.retry_count >= max_retries {
                delete_in(tx, Collection::SyncQueue, &RecordKey::Int(id))?;
                FailureOutcome::Dropped {
                    retry_count: item.retry_count,
                }
            } else {
                let doc = serde_json::to_value(&item)?;
                put_in(tx, Collection::SyncQueue, &doc, ctx.now, None)?;
                FailureOutcome::Retried {
                    retry_count: item.retry_count,
                }
            };

            let audit = match outcome {
                FailureOutcome::Dropped { .. } => AuditOutcome::Dropped,
                FailureOutcome::Retried { .. } => AuditOutcome::Retried,
            };
            ctx.record(
                AuditEvent::for_item(id, item.operation.as_str(), audit, ctx.now)
                    .with_failure(item.retry_count, error),
            );
            Ok((item.operation, outcome))
        })?;

        match outcome {
            FailureOutcome::Dropped { retry_count } => warn!(
                operation = %operation,
                item_id = id,
                retry_count,
                error,
                "Sync item dropped after exhausting retries"
            ),
            FailureOutcome::Retried { retry_count } => debug!(
                operation = %operation,
                item_id = id,
                retry_count,
                error,
                "Sync item will be retried"
            ),
        }
        Ok(outcome)
    }

    /// Number of queued items.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails.
    pub fn depth(&self) -> Result<usize> {
        self.store.count(Collection::SyncQueue)
    }

    /// Items dropped after exhausting retries at or after `since_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit query fails.
    pub fn count_dropped_since(&self, since_ms: i64) -> Result<usize> {
        self.store.count_dropped_since(since_ms)
    }

    /// Mark the end of a drain in the audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record_drain_completed(&self) -> Result<()> {
        self.store.mutate("drain_completed", |_, ctx| {
            ctx.record(AuditEvent::drain_completed(ctx.now));
            Ok(())
        })
    }

    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }
}

fn load_item(conn: &Connection, id: i64) -> Result<Option<SyncQueueItem>> {
    get_in(conn, Collection::SyncQueue, &RecordKey::Int(id))?
        .map(item_from_record)
        .transpose()
}

fn item_from_record(record: Record) -> Result<SyncQueueItem> {
    serde_json::from_value(record.data).map_err(|e| {
        StoreError::InvalidRecord(format!("sync queue item {} is malformed: {e}", record.key)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use std::sync::Arc;
    use std::time::Duration;

    fn queue() -> (SyncQueue, ManualClock) {
        let clock = ManualClock::new(1_000);
        let store = RecordStore::open_memory(Arc::new(clock.clone())).unwrap();
        (SyncQueue::new(store), clock)
    }

    fn alert(name: &str) -> serde_json::Value {
        json!({ "name": name })
    }

    #[test]
    fn test_peek_orders_by_priority_then_age() {
        let (queue, clock) = queue();

        let p1 = queue.enqueue(OperationKind::CreateAlert, alert("p1"), 1).unwrap();
        clock.advance(Duration::from_millis(10));
        let p3 = queue.enqueue(OperationKind::CreateAlert, alert("p3"), 3).unwrap();
        clock.advance(Duration::from_millis(10));
        let p2 = queue.enqueue(OperationKind::CreateAlert, alert("p2"), 2).unwrap();

        let ids: Vec<_> = queue.peek_batch(3).unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![p3, p2, p1]);
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order_with_stalled_clock() {
        let (queue, _) = queue();

        let a = queue.enqueue(OperationKind::CreateAlert, alert("a"), 1).unwrap();
        let b = queue.enqueue(OperationKind::CreateAlert, alert("b"), 1).unwrap();
        let c = queue.enqueue(OperationKind::CreateAlert, alert("c"), 1).unwrap();

        let batch = queue.peek_batch(10).unwrap();
        assert_eq!(batch.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a, b, c]);
        assert!(batch[0].created_at < batch[1].created_at);
        assert!(batch[1].created_at < batch[2].created_at);
    }

    #[test]
    fn test_created_at_monotonic_when_clock_steps_back() {
        let (queue, clock) = queue();
        let first = queue.enqueue(OperationKind::CreateAlert, alert("a"), 1).unwrap();
        clock.set(0);
        let second = queue.enqueue(OperationKind::CreateAlert, alert("b"), 1).unwrap();

        let first = queue.get(first).unwrap().unwrap();
        let second = queue.get(second).unwrap().unwrap();
        assert!(second.created_at > first.created_at);
    }

    #[test]
    fn test_peek_respects_max() {
        let (queue, _) = queue();
        for i in 0..5 {
            queue
                .enqueue(OperationKind::TrackAnalytics, json!({"event_type": "view", "n": i}), 1)
                .unwrap();
        }
        assert_eq!(queue.peek_batch(2).unwrap().len(), 2);
        assert_eq!(queue.depth().unwrap(), 5);
    }

    #[test]
    fn test_retry_bound() {
        let (queue, _) = queue();
        let id = queue.enqueue(OperationKind::CreateAlert, alert("x"), 1).unwrap();

        assert_eq!(
            queue.record_failure(id, "boom", 3).unwrap(),
            FailureOutcome::Retried { retry_count: 1 }
        );
        assert_eq!(
            queue.record_failure(id, "boom", 3).unwrap(),
            FailureOutcome::Retried { retry_count: 2 }
        );
        let item = queue.get(id).unwrap().unwrap();
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.last_error.as_deref(), Some("boom"));
        assert_eq!(item.last_attempt, Some(1_000));

        assert_eq!(
            queue.record_failure(id, "boom", 3).unwrap(),
            FailureOutcome::Dropped { retry_count: 3 }
        );
        assert!(queue.get(id).unwrap().is_none());
        assert_eq!(queue.count_dropped_since(0).unwrap(), 1);
    }

    #[test]
    fn test_failure_on_missing_item_is_not_found() {
        let (queue, _) = queue();
        let err = queue.record_failure(404, "gone", 3).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_remove_is_idempotent_and_audited() {
        let (queue, _) = queue();
        let id = queue.enqueue(OperationKind::UpdatePreferences, json!({"theme": "dark"}), 1).unwrap();

        assert!(queue.remove(id).unwrap());
        assert!(!queue.remove(id).unwrap());
        assert_eq!(queue.depth().unwrap(), 0);

        let audit = queue.store().recent_audit(Some(10)).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].outcome, AuditOutcome::Synced);
        assert_eq!(audit[0].operation.as_deref(), Some("update_preferences"));
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let (queue, _) = queue();
        let err = queue
            .enqueue(OperationKind::TrackAnalytics, json!({"no_type": 1}), 1)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[test]
    fn test_malformed_row_is_discarded_and_audited() {
        let (queue, _) = queue();
        let good = queue.enqueue(OperationKind::CreateAlert, alert("Price Drop"), 1).unwrap();
        queue
            .store()
            .put(Collection::SyncQueue, &json!({"note": "bad", "priority": 5}), None)
            .unwrap();

        let batch = queue.peek_batch(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, good);
        assert_eq!(queue.depth().unwrap(), 1);
        assert_eq!(queue.count_dropped_since(0).unwrap(), 1);

        let audit = queue.store().recent_audit(Some(10)).unwrap();
        assert_eq!(audit[0].outcome, AuditOutcome::Dropped);
        assert!(audit[0].error.as_deref().unwrap().contains("malformed"));
    }

    #[test]
    fn test_drain_marker_sets_last_sync() {
        let (queue, clock) = queue();
        assert_eq!(queue.store().last_sync().unwrap(), None);
        clock.set(5_000);
        queue.record_drain_completed().unwrap();
        assert_eq!(queue.store().last_sync().unwrap(), Some(5_000));
    }
}
