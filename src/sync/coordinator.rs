//! Drain scheduling.
//!
//! The coordinator folds every trigger source (reconnect, becoming visible,
//! a periodic tick, a manual request, a sibling instance's signal) into one
//! decision: start a drain if none is running, otherwise drop the trigger.
//! Drains run on their own task so the loop keeps observing triggers.
//!
//! Instances sharing a store announce clean drains on a [`SyncBus`]. The
//! announcement is advisory: it makes siblings drain (and skip their next
//! periodic tick), it never excludes them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::api::SyncApi;
use super::connectivity::Connectivity;
use super::processor::{DrainOutcome, SyncProcessor};
use crate::cache::CacheLayer;
use crate::error::Result;

/// "Sync requested" announcement. `origin` identifies the sender so an
/// instance can ignore its own echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSignal {
    pub origin: Uuid,
}

/// Broadcast channel shared by instances of one profile.
#[derive(Debug, Clone)]
pub struct SyncBus {
    tx: broadcast::Sender<SyncSignal>,
}

impl SyncBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Announce to every subscriber. Nobody listening is not an error.
    pub fn publish(&self, signal: SyncSignal) {
        let receivers = self.tx.send(signal).unwrap_or(0);
        debug!(origin = %signal.origin, receivers, "Sync signal published");
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncSignal> {
        self.tx.subscribe()
    }
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Requests a drain from outside the coordinator.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Ask for a drain. Returns false if a request is already pending.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Why a drain was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Startup,
    Reconnected,
    Visible,
    Periodic,
    Manual,
    Peer,
}

impl Trigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Reconnected => "reconnected",
            Self::Visible => "visible",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
            Self::Peer => "peer",
        }
    }
}

/// Clears the in-flight flag when a drain task ends, panics included.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the trigger sources and the in-flight drain.
pub struct Coordinator<A> {
    id: Uuid,
    in_flight: Arc<AtomicBool>,
    processor: Arc<SyncProcessor<A>>,
    cache: CacheLayer,
    connectivity: Connectivity,
    bus: SyncBus,
    interval: Duration,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: mpsc::Receiver<()>,
}

impl<A: SyncApi + 'static> Coordinator<A> {
    #[must_use]
    pub fn new(
        processor: Arc<SyncProcessor<A>>,
        cache: CacheLayer,
        connectivity: Connectivity,
        bus: SyncBus,
        interval: Duration,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            id: Uuid::new_v4(),
            in_flight: Arc::new(AtomicBool::new(false)),
            processor,
            cache,
            connectivity,
            bus,
            interval,
            trigger_tx,
            trigger_rx,
        }
    }

    /// This instance's identity on the bus.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.trigger_tx.clone(),
        }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Shutdown stops accepting triggers, then waits for an in-flight drain
    /// to finish.
    ///
    /// # Errors
    ///
    /// Currently infallible; drain failures are logged.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut online_rx = self.connectivity.subscribe_online();
        let mut visible_rx = self.connectivity.subscribe_visible();
        let mut signals = self.bus.subscribe();

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut drains = JoinSet::new();
        let mut last_peer_signal: Option<Instant> = None;

        info!(instance = %self.id, interval_secs = self.interval.as_secs(), "Coordinator started");

        if *shutdown.borrow() {
            return Ok(());
        }
        if self.connectivity.is_online() {
            self.start_drain(Trigger::Startup, &mut drains);
        }

        loop {
            let trigger = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                    None
                }
                Ok(()) = online_rx.changed() => {
                    let online = *online_rx.borrow_and_update();
                    online.then_some(Trigger::Reconnected)
                }
                Ok(()) = visible_rx.changed() => {
                    let visible = *visible_rx.borrow_and_update();
                    (visible && self.connectivity.is_online()).then_some(Trigger::Visible)
                }
                _ = ticker.tick() => {
                    match last_peer_signal {
                        Some(at) if at.elapsed() < self.interval => {
                            debug!("Periodic tick skipped: a sibling drained recently");
                            None
                        }
                        _ => Some(Trigger::Periodic),
                    }
                }
                Some(()) = self.trigger_rx.recv() => Some(Trigger::Manual),
                signal = signals.recv() => match signal {
                    Ok(signal) if signal.origin == self.id => None,
                    Ok(signal) => {
                        debug!(origin = %signal.origin, "Sync signal received");
                        last_peer_signal = Some(Instant::now());
                        Some(Trigger::Peer)
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sync bus lagged");
                        last_peer_signal = Some(Instant::now());
                        Some(Trigger::Peer)
                    }
                    Err(broadcast::error::RecvError::Closed) => None,
                },
                Some(joined) = drains.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Drain task failed");
                    }
                    None
                }
            };

            if let Some(trigger) = trigger {
                self.start_drain(trigger, &mut drains);
            }
        }

        info!("Coordinator stopping; waiting for in-flight drain");
        while let Some(joined) = drains.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Drain task failed");
            }
        }
        info!("Coordinator stopped");
        Ok(())
    }

    fn start_drain(&self, trigger: Trigger, drains: &mut JoinSet<()>) {
        if self.processor.is_draining() || self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(trigger = trigger.as_str(), "Trigger dropped: drain in progress");
            return;
        }
        let in_flight = InFlight(Arc::clone(&self.in_flight));

        let processor = Arc::clone(&self.processor);
        let cache = self.cache.clone();
        let bus = self.bus.clone();
        let origin = self.id;
        let online = self.connectivity.is_online();

        debug!(trigger = trigger.as_str(), "Drain requested");
        drains.spawn(async move {
            let _in_flight = in_flight;
            match processor.drain(online).await {
                Ok(DrainOutcome::Completed(stats)) if stats.is_clean() => {
                    if let Err(e) = cache.sweep_expired() {
                        warn!(error = %e, "Cache sweep after drain failed");
                    }
                    if trigger != Trigger::Peer {
                        bus.publish(SyncSignal { origin });
                    }
                }
                Ok(_) => {}
                Err(e) => error!(trigger = trigger.as_str(), error = %e, "Drain aborted"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtls;
    use crate::clock::ManualClock;
    use crate::model::OperationKind;
    use crate::storage::{AuditOutcome, RecordStore};
    use crate::sync::processor::ProcessorConfig;
    use crate::sync::queue::SyncQueue;
    use crate::sync::testing::ScriptedApi;
    use serde_json::json;

    const INTERVAL: Duration = Duration::from_secs(60);

    struct Harness {
        coordinator: Coordinator<ScriptedApi>,
        queue: SyncQueue,
        connectivity: Connectivity,
        bus: SyncBus,
        processor: Arc<SyncProcessor<ScriptedApi>>,
    }

    fn harness(api: ScriptedApi, online: bool) -> Harness {
        let clock = ManualClock::new(1_000_000);
        let store = RecordStore::open_memory(Arc::new(clock)).unwrap();
        let queue = SyncQueue::new(store.clone());
        let config = ProcessorConfig {
            retry_delay: Duration::ZERO,
            ..ProcessorConfig::default()
        };
        let processor = Arc::new(SyncProcessor::new(queue.clone(), api, config));
        let connectivity = Connectivity::new(online);
        let bus = SyncBus::default();
        let coordinator = Coordinator::new(
            processor.clone(),
            CacheLayer::new(store, CacheTtls::default()),
            connectivity.clone(),
            bus.clone(),
            INTERVAL,
        );
        Harness {
            coordinator,
            queue,
            connectivity,
            bus,
            processor,
        }
    }

    fn drains_completed(queue: &SyncQueue) -> usize {
        queue
            .store()
            .recent_audit(None)
            .unwrap()
            .iter()
            .filter(|e| e.outcome == AuditOutcome::DrainCompleted)
            .count()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    fn start(
        coordinator: Coordinator<ScriptedApi>,
    ) -> (watch::Sender<bool>, tokio::task::JoinHandle<Result<()>>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (shutdown_tx, tokio::spawn(coordinator.run(shutdown_rx)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_drains_and_announces() {
        let api = ScriptedApi::default();
        let h = harness(api.clone(), false);
        h.queue.enqueue(OperationKind::CreateAlert, json!({"name": "Price Drop"}), 1).unwrap();
        let mut sibling = h.bus.subscribe();
        let id = h.coordinator.id();
        let (shutdown, handle) = start(h.coordinator);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.call_count(), 0);

        h.connectivity.set_online(true);
        wait_for(|| h.queue.depth().unwrap() == 0).await;
        assert_eq!(api.call_count(), 1);

        let signal = tokio::time::timeout(Duration::from_secs(1), sibling.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.origin, id);

        shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_signal_drains_without_echo() {
        let api = ScriptedApi::default();
        let h = harness(api.clone(), true);
        let mut sibling = h.bus.subscribe();
        let (shutdown, handle) = start(h.coordinator);

        // Startup drain on an empty queue announces once.
        tokio::time::timeout(Duration::from_secs(1), sibling.recv())
            .await
            .unwrap()
            .unwrap();
        wait_for(|| !h.processor.is_draining()).await;

        h.queue.enqueue(OperationKind::CreateAlert, json!({}), 1).unwrap();
        let peer = SyncSignal {
            origin: Uuid::new_v4(),
        };
        h.bus.publish(peer);
        assert_eq!(sibling.recv().await.unwrap(), peer);

        wait_for(|| drains_completed(&h.queue) == 2).await;
        wait_for(|| !h.processor.is_draining()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(api.call_count(), 1);
        assert!(matches!(
            sibling.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_during_drain_are_dropped() {
        let (api, gate) = ScriptedApi::default().gated();
        let h = harness(api.clone(), false);
        h.queue.enqueue(OperationKind::CreateAlert, json!({}), 1).unwrap();
        let trigger = h.coordinator.trigger_handle();
        let (shutdown, handle) = start(h.coordinator);

        h.connectivity.set_online(true);
        wait_for(|| h.processor.is_draining()).await;

        for _ in 0..3 {
            trigger.request();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.connectivity.set_visible(false);
        h.connectivity.set_visible(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.add_permits(10);
        wait_for(|| drains_completed(&h.queue) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(drains_completed(&h.queue), 1);
        assert_eq!(api.call_count(), 1);

        shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_tick_drains_while_online() {
        let api = ScriptedApi::default();
        let h = harness(api.clone(), true);
        let (shutdown, handle) = start(h.coordinator);

        wait_for(|| drains_completed(&h.queue) == 1).await;
        h.queue.enqueue(OperationKind::CreateAlert, json!({}), 1).unwrap();

        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        wait_for(|| h.queue.depth().unwrap() == 0).await;
        assert_eq!(api.call_count(), 1);

        shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_tick_does_not_dispatch() {
        let api = ScriptedApi::default();
        let h = harness(api.clone(), false);
        h.queue.enqueue(OperationKind::CreateAlert, json!({}), 1).unwrap();
        let (shutdown, handle) = start(h.coordinator);

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(api.call_count(), 0);
        assert_eq!(h.queue.depth().unwrap(), 1);

        shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_drain() {
        let (api, gate) = ScriptedApi::default().gated();
        let h = harness(api.clone(), false);
        h.queue.enqueue(OperationKind::CreateAlert, json!({}), 1).unwrap();
        let (shutdown, handle) = start(h.coordinator);

        h.connectivity.set_online(true);
        wait_for(|| h.processor.is_draining()).await;

        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        gate.add_permits(1);
        handle.await.unwrap().unwrap();
        assert_eq!(api.call_count(), 1);
        assert_eq!(h.queue.depth().unwrap(), 0);
    }
}
