//! Queue drain.
//!
//! A processor is either idle or draining. A drain takes one batch in queue
//! order and dispatches it strictly one item at a time: success removes the
//! item, failure goes through the retry accounting. A second drain requested
//! while one is running is a no-op.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::api::SyncApi;
use super::queue::{FailureOutcome, SyncQueue};
use crate::error::{Error, Result, StoreError};

/// Retry and batching knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Failures after which an item is dropped.
    pub max_retries: u32,
    /// Base wait after a failure, scaled by the item's failure count. Zero disables pacing.
    pub retry_delay: Duration,
    /// Items taken per drain.
    pub batch_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            batch_size: 50,
        }
    }
}

/// Counters for one drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dropped: usize,
    /// Items still waiting out their retry delay.
    pub skipped: usize,
}

impl DrainStats {
    /// Every attempted item succeeded and none were left waiting.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.retried == 0 && self.dropped == 0 && self.skipped == 0
    }
}

/// Result of asking for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Skipped: the device is offline.
    Offline,
    /// Skipped: another drain is running.
    AlreadyDraining,
    Completed(DrainStats),
}

/// Clears the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the queue against a [`SyncApi`].
#[derive(Debug)]
pub struct SyncProcessor<A> {
    queue: SyncQueue,
    api: A,
    config: ProcessorConfig,
    draining: AtomicBool,
}

impl<A: SyncApi> SyncProcessor<A> {
    #[must_use]
    pub fn new(queue: SyncQueue, api: A, config: ProcessorConfig) -> Self {
        Self {
            queue,
            api,
            config,
            draining: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one drain if online and idle.
    ///
    /// Dispatch failures are recorded on the items, never returned.
    ///
    /// # Errors
    ///
    /// Returns store errors, which abort the drain.
    pub async fn drain(&self, online: bool) -> Result<DrainOutcome> {
        if !online {
            debug!("Drain skipped: offline");
            return Ok(DrainOutcome::Offline);
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain skipped: already draining");
            return Ok(DrainOutcome::AlreadyDraining);
        }
        let _guard = DrainGuard(&self.draining);

        let batch = self.queue.peek_batch(self.config.batch_size)?;
        info!(items = batch.len(), "Drain started");

        let retry_delay_ms = u64::try_from(self.config.retry_delay.as_millis()).unwrap_or(u64::MAX);
        let mut stats = DrainStats::default();

        for item in batch {
            if !item.is_due(self.queue.store().now_ms(), retry_delay_ms) {
                debug!(
                    operation = %item.operation,
                    item_id = item.id,
                    retry_count = item.retry_count,
                    "Sync item not yet due"
                );
                stats.skipped += 1;
                continue;
            }

            stats.attempted += 1;
            match self.api.dispatch(item.operation, &item.payload).await {
                Ok(()) => {
                    self.queue.remove(item.id)?;
                    stats.succeeded += 1;
                    info!(operation = %item.operation, item_id = item.id, "Sync item applied");
                }
                Err(err) => {
                    let error = err.to_string();
                    match self
                        .queue
                        .record_failure(item.id, &error, self.config.max_retries)
                    {
                        Ok(FailureOutcome::Retried { .. }) => stats.retried += 1,
                        Ok(FailureOutcome::Dropped { .. }) => stats.dropped += 1,
                        // Removed by a sibling instance's drain.
                        Err(Error::Store(StoreError::NotFound { .. })) => {
                            warn!(item_id = item.id, error = %error, "Failed item already gone from queue");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        self.queue.record_drain_completed()?;
        info!(
            attempted = stats.attempted,
            succeeded = stats.succeeded,
            retried = stats.retried,
            dropped = stats.dropped,
            skipped = stats.skipped,
            "Drain finished"
        );
        Ok(DrainOutcome::Completed(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SyncError;
    use crate::model::OperationKind;
    use crate::storage::RecordStore;
    use crate::sync::testing::ScriptedApi;
    use serde_json::json;
    use std::sync::Arc;

    fn processor(
        api: ScriptedApi,
        retry_delay: Duration,
    ) -> (Arc<SyncProcessor<ScriptedApi>>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let store = RecordStore::open_memory(Arc::new(clock.clone())).unwrap();
        let config = ProcessorConfig {
            retry_delay,
            ..ProcessorConfig::default()
        };
        (
            Arc::new(SyncProcessor::new(SyncQueue::new(store), api, config)),
            clock,
        )
    }

    fn rejected() -> std::result::Result<(), SyncError> {
        Err(SyncError::ServerRejected(500))
    }

    fn completed(outcome: DrainOutcome) -> DrainStats {
        match outcome {
            DrainOutcome::Completed(stats) => stats,
            other => panic!("expected a completed drain, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_price_drop_alert_succeeds_on_third_attempt() {
        let api = ScriptedApi::new([rejected(), rejected(), Ok(())]);
        let (processor, _) = processor(api.clone(), Duration::ZERO);
        let queue = processor.queue().clone();

        let id = queue
            .enqueue(OperationKind::CreateAlert, json!({"name": "Price Drop"}), 1)
            .unwrap();

        completed(processor.drain(true).await.unwrap());
        completed(processor.drain(true).await.unwrap());
        assert_eq!(queue.get(id).unwrap().unwrap().retry_count, 2);

        let stats = completed(processor.drain(true).await.unwrap());
        assert_eq!(stats.succeeded, 1);

        assert_eq!(api.call_count(), 3);
        assert!(api
            .calls()
            .iter()
            .all(|(op, payload)| *op == OperationKind::CreateAlert
                && payload == &json!({"name": "Price Drop"})));
        assert!(queue.get(id).unwrap().is_none());
        assert_eq!(queue.count_dropped_since(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_item_dropped_after_max_retries() {
        let api = ScriptedApi::new([rejected(), rejected(), rejected(), rejected()]);
        let (processor, _) = processor(api.clone(), Duration::ZERO);
        let queue = processor.queue().clone();
        let id = queue
            .enqueue(OperationKind::CreateNotification, json!({"title": "hi"}), 1)
            .unwrap();

        for _ in 0..2 {
            processor.drain(true).await.unwrap();
            assert!(queue.get(id).unwrap().is_some());
        }
        let stats = completed(processor.drain(true).await.unwrap());
        assert_eq!(stats.dropped, 1);
        assert!(queue.get(id).unwrap().is_none());

        // Nothing left to attempt.
        let stats = completed(processor.drain(true).await.unwrap());
        assert_eq!(stats.attempted, 0);
        assert_eq!(api.call_count(), 3);
        assert_eq!(queue.count_dropped_since(0).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_every_item_attempted_in_queue_order() {
        let api = ScriptedApi::default();
        let (processor, clock) = processor(api.clone(), Duration::ZERO);
        let queue = processor.queue();

        queue.enqueue(OperationKind::CreateAlert, json!({"n": 1}), 1).unwrap();
        clock.advance(Duration::from_millis(1));
        queue
            .enqueue(OperationKind::TrackAnalytics, json!({"event_type": "click", "n": 2}), 5)
            .unwrap();
        clock.advance(Duration::from_millis(1));
        queue.enqueue(OperationKind::UpdatePreferences, json!({"n": 3}), 1).unwrap();

        let stats = completed(processor.drain(true).await.unwrap());
        assert_eq!(stats.attempted, 3);
        assert!(stats.is_clean());

        let order: Vec<_> = api.calls().iter().map(|(_, p)| p["n"].clone()).collect();
        assert_eq!(order, vec![json!(2), json!(1), json!(3)]);
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_drain_is_skipped() {
        let api = ScriptedApi::default();
        let (processor, _) = processor(api.clone(), Duration::ZERO);
        processor
            .queue()
            .enqueue(OperationKind::CreateAlert, json!({}), 1)
            .unwrap();

        assert_eq!(processor.drain(false).await.unwrap(), DrainOutcome::Offline);
        assert_eq!(api.call_count(), 0);
        assert_eq!(processor.queue().depth().unwrap(), 1);
        assert_eq!(processor.queue().store().last_sync().unwrap(), None);
    }

    #[tokio::test]
    async fn test_retry_delay_paces_failed_items() {
        let api = ScriptedApi::new([rejected()]);
        let (processor, clock) = processor(api.clone(), Duration::from_secs(5));
        let id = processor
            .queue()
            .enqueue(OperationKind::CreateAlert, json!({}), 1)
            .unwrap();

        completed(processor.drain(true).await.unwrap());

        clock.advance(Duration::from_secs(4));
        let stats = completed(processor.drain(true).await.unwrap());
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.attempted, 0);
        assert!(!stats.is_clean());

        clock.advance(Duration::from_secs(1));
        let stats = completed(processor.drain(true).await.unwrap());
        assert_eq!(stats.succeeded, 1);
        assert_eq!(api.call_count(), 2);
        assert!(processor.queue().get(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_drain_while_draining_is_noop() {
        let (api, gate) = ScriptedApi::default().gated();
        let (processor, _) = processor(api.clone(), Duration::ZERO);
        processor
            .queue()
            .enqueue(OperationKind::CreateAlert, json!({}), 1)
            .unwrap();

        let running = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.drain(true).await })
        };
        while !processor.is_draining() {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            processor.drain(true).await.unwrap(),
            DrainOutcome::AlreadyDraining
        );

        gate.add_permits(1);
        let stats = completed(running.await.unwrap().unwrap());
        assert_eq!(stats.succeeded, 1);
        assert!(!processor.is_draining());
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_records_last_sync() {
        let (processor, clock) = processor(ScriptedApi::default(), Duration::ZERO);
        clock.set(42_000);
        completed(processor.drain(true).await.unwrap());
        assert_eq!(processor.queue().store().last_sync().unwrap(), Some(42_000));
    }
}
