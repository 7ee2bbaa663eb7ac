//! Telemetry Broadcast Hub
//!
//! Single fan-out point for call telemetry.
//!
//! # Architecture
//!
//! ```text
//! CallGate ──publish──► [bounded queue] ──► dispatch loop ─┬─► log subscribers
//!                                                          └─► statistics windows
//!                                                                  │
//!                                              timer task ◄────────┘
//!                                                  └─► statistics subscribers
//! ```
//!
//! Publishing never waits: a full queue drops the item and counts it.
//! Every accepted item gets a sequence number; a subscription only sees
//! items numbered at or after the point it registered.

mod aggregator;
mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use aggregator::{StatWindow, StatisticsAggregator};
pub use registry::{
    SubscribeError, Subscriber, Subscription, SubscriptionId, SubscriptionKind,
    SubscriptionRegistry,
};

use crate::application::ports::{PublishError, TelemetrySink};
use crate::domain::telemetry::{AggregationInterval, Event, StatSample, StatSnapshot};
use crate::infrastructure::config::HubSettings;
use crate::infrastructure::lifecycle::LifecycleController;
use crate::infrastructure::metrics;

// =============================================================================
// Telemetry Items
// =============================================================================

/// An item accepted by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Telemetry {
    /// Access-log event, fanned out to log subscribers.
    Event(Event),
    /// Stat sample, folded into statistics windows.
    Sample(StatSample),
}

impl Telemetry {
    /// Stream this item feeds.
    #[must_use]
    pub const fn kind(&self) -> SubscriptionKind {
        match self {
            Self::Event(_) => SubscriptionKind::Logs,
            Self::Sample(_) => SubscriptionKind::Statistics,
        }
    }
}

impl From<Event> for Telemetry {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl From<StatSample> for Telemetry {
    fn from(sample: StatSample) -> Self {
        Self::Sample(sample)
    }
}

#[derive(Debug)]
struct Sequenced {
    seq: u64,
    item: Telemetry,
}

// =============================================================================
// Hub
// =============================================================================

/// Hub capacities.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Capacity of the publish queue.
    pub queue_capacity: usize,
    /// Undelivered items buffered per subscriber.
    pub subscriber_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            subscriber_capacity: 1024,
        }
    }
}

impl From<HubSettings> for HubConfig {
    fn from(settings: HubSettings) -> Self {
        Self {
            queue_capacity: settings.publish_queue_capacity,
            subscriber_capacity: settings.subscriber_capacity,
        }
    }
}

/// Central telemetry hub.
///
/// Created with [`TelemetryHub::start`], which spawns the dispatch loop and
/// the statistics timer under the given lifecycle.
///
/// # Example
///
/// ```rust,no_run
/// use rpc_gatekeeper::infrastructure::broadcast::{HubConfig, TelemetryHub};
/// use rpc_gatekeeper::infrastructure::lifecycle::LifecycleController;
///
/// # async fn run() {
/// let lifecycle = LifecycleController::new();
/// let hub = TelemetryHub::start(HubConfig::default(), &lifecycle);
///
/// let mut logs = hub.subscribe_logs().unwrap();
/// // Events published from now on arrive on `logs`.
/// # let _ = logs.recv().await;
/// lifecycle.shutdown().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TelemetryHub {
    tx: mpsc::Sender<Sequenced>,
    seq: AtomicU64,
    logs: Arc<SubscriptionRegistry<Arc<Event>>>,
    aggregator: Arc<StatisticsAggregator>,
    cancel: CancellationToken,
    accepted: AtomicU64,
    dropped_at_publish: AtomicU64,
}

/// Shared telemetry hub reference.
pub type SharedTelemetryHub = Arc<TelemetryHub>;

impl TelemetryHub {
    /// Create the hub and spawn its dispatch loop and statistics timer.
    #[must_use]
    pub fn start(config: HubConfig, lifecycle: &LifecycleController) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let cancel = lifecycle.token();

        let hub = Arc::new(Self {
            tx,
            seq: AtomicU64::new(0),
            logs: Arc::new(SubscriptionRegistry::new(
                SubscriptionKind::Logs,
                config.subscriber_capacity,
            )),
            aggregator: Arc::new(StatisticsAggregator::new(config.subscriber_capacity)),
            cancel: cancel.clone(),
            accepted: AtomicU64::new(0),
            dropped_at_publish: AtomicU64::new(0),
        });

        lifecycle.spawn(
            "telemetry-dispatch",
            dispatch_loop(
                rx,
                Arc::clone(&hub.logs),
                Arc::clone(&hub.aggregator),
                cancel.clone(),
            ),
        );
        lifecycle.spawn("statistics-timer", Arc::clone(&hub.aggregator).run(cancel));

        tracing::info!(
            queue_capacity = config.queue_capacity,
            subscriber_capacity = config.subscriber_capacity,
            "Telemetry hub started"
        );
        hub
    }

    /// Enqueue an item for dispatch without waiting.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::QueueFull` if the queue is at capacity, or
    /// `PublishError::Closed` once the hub is shutting down. Either way
    /// the item is dropped and counted.
    pub fn publish(&self, item: impl Into<Telemetry>) -> Result<(), PublishError> {
        let item = item.into();
        let kind = item.kind();

        let result = if self.cancel.is_cancelled() {
            Err(PublishError::Closed)
        } else {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            self.tx
                .try_send(Sequenced { seq, item })
                .map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => PublishError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
                })
        };

        match result {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.dropped_at_publish.fetch_add(1, Ordering::Relaxed);
                metrics::record_publish_drop(kind);
                tracing::warn!(kind = kind.as_str(), error = %e, "Telemetry item dropped at publish");
                Err(e)
            }
        }
    }

    /// Open a log subscription. It receives every event published after
    /// this call returns.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError::ShuttingDown` once shutdown has begun.
    pub fn subscribe_logs(&self) -> Result<Subscription<Arc<Event>>, SubscribeError> {
        self.ensure_accepting()?;
        let subscription = self.logs.register(|| self.seq.load(Ordering::SeqCst), ())?;
        tracing::info!(subscription_id = subscription.id(), "Log subscription opened");
        Ok(subscription)
    }

    /// Open a statistics subscription with its own aggregation window.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError::ShuttingDown` once shutdown has begun.
    pub fn subscribe_statistics(
        &self,
        interval: AggregationInterval,
    ) -> Result<Subscription<StatSnapshot>, SubscribeError> {
        self.ensure_accepting()?;
        self.aggregator
            .subscribe(|| self.seq.load(Ordering::SeqCst), interval)
    }

    /// Remove a subscription. Idempotent; dropping the handle does the same.
    pub fn unsubscribe(&self, kind: SubscriptionKind, id: SubscriptionId) {
        match kind {
            SubscriptionKind::Logs => self.logs.remove(id),
            SubscriptionKind::Statistics => self.aggregator.unsubscribe(id),
        }
    }

    /// Whether the hub still accepts publishes and subscriptions.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn ensure_accepting(&self) -> Result<(), SubscribeError> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(SubscribeError::ShuttingDown)
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            log_subscribers: self.logs.len(),
            stat_subscribers: self.aggregator.len(),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_at_publish: self.dropped_at_publish.load(Ordering::Relaxed),
            dropped_for_subscribers: self.logs.dropped() + self.aggregator.dropped(),
            snapshots_emitted: self.aggregator.emitted(),
        }
    }
}

impl TelemetrySink for TelemetryHub {
    fn publish_event(&self, event: Event) -> Result<(), PublishError> {
        self.publish(event)
    }

    fn publish_sample(&self, sample: StatSample) -> Result<(), PublishError> {
        self.publish(sample)
    }
}

/// Statistics about the telemetry hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Live log subscriptions.
    pub log_subscribers: usize,
    /// Live statistics subscriptions.
    pub stat_subscribers: usize,
    /// Items accepted into the publish queue.
    pub accepted: u64,
    /// Items refused at publish.
    pub dropped_at_publish: u64,
    /// Items dropped for lagging subscribers.
    pub dropped_for_subscribers: u64,
    /// Statistics snapshots delivered.
    pub snapshots_emitted: u64,
}

impl HubStats {
    /// Get total number of live subscriptions.
    #[must_use]
    pub const fn total_subscribers(&self) -> usize {
        self.log_subscribers + self.stat_subscribers
    }
}

// =============================================================================
// Dispatch Loop
// =============================================================================

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Sequenced>,
    logs: Arc<SubscriptionRegistry<Arc<Event>>>,
    aggregator: Arc<StatisticsAggregator>,
    cancel: CancellationToken,
) {
    tracing::debug!("Telemetry dispatch loop started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(item) => dispatch(item, &logs, &aggregator),
                None => break,
            },
        }
    }

    // Deliver what was accepted before shutdown, then end every log stream.
    rx.close();
    let mut drained = 0_usize;
    while let Ok(item) = rx.try_recv() {
        dispatch(item, &logs, &aggregator);
        drained += 1;
    }
    logs.close();

    tracing::debug!(drained, "Telemetry dispatch loop stopped");
}

fn dispatch(
    Sequenced { seq, item }: Sequenced,
    logs: &SubscriptionRegistry<Arc<Event>>,
    aggregator: &StatisticsAggregator,
) {
    match item {
        Telemetry::Event(event) => {
            logs.broadcast(seq, &Arc::new(event));
        }
        Telemetry::Sample(sample) => aggregator.accumulate(seq, &sample),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::access::MethodPath;

    fn event(consumer: &str) -> Event {
        Event::new(
            consumer,
            MethodPath::parse("/main.Biz/Check").unwrap(),
            "127.0.0.1:40000",
        )
    }

    fn sample(consumer: &str) -> StatSample {
        StatSample::new(consumer, MethodPath::parse("/main.Biz/Check").unwrap())
    }

    fn start(config: HubConfig) -> (LifecycleController, Arc<TelemetryHub>) {
        let lifecycle = LifecycleController::new();
        let hub = TelemetryHub::start(config, &lifecycle);
        (lifecycle, hub)
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_publish_order() {
        let (lifecycle, hub) = start(HubConfig::default());
        let mut logs = hub.subscribe_logs().unwrap();

        hub.publish(event("e1")).unwrap();
        hub.publish(event("e2")).unwrap();

        assert_eq!(logs.recv().await.unwrap().consumer, "e1");
        assert_eq!(logs.recv().await.unwrap().consumer, "e2");

        lifecycle.shutdown().await;
        assert!(logs.recv().await.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_sees_only_later_events() {
        let (lifecycle, hub) = start(HubConfig::default());
        let mut early = hub.subscribe_logs().unwrap();

        hub.publish(event("e1")).unwrap();
        let mut late = hub.subscribe_logs().unwrap();
        hub.publish(event("e2")).unwrap();

        assert_eq!(early.recv().await.unwrap().consumer, "e1");
        assert_eq!(early.recv().await.unwrap().consumer, "e2");
        assert_eq!(late.recv().await.unwrap().consumer, "e2");

        lifecycle.shutdown().await;
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribers_share_one_event_instance() {
        let (lifecycle, hub) = start(HubConfig::default());
        let mut a = hub.subscribe_logs().unwrap();
        let mut b = hub.subscribe_logs().unwrap();

        hub.publish(event("shared")).unwrap();

        let from_a = a.recv().await.unwrap();
        let from_b = b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&from_a, &from_b));

        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_stall_others() {
        let (lifecycle, hub) = start(HubConfig {
            queue_capacity: 64,
            subscriber_capacity: 2,
        });
        let mut stalled = hub.subscribe_logs().unwrap();
        let mut active = hub.subscribe_logs().unwrap();

        for i in 0..5 {
            hub.publish(event(&format!("e{i}"))).unwrap();
            assert_eq!(active.recv().await.unwrap().consumer, format!("e{i}"));
        }

        assert_eq!(stalled.recv().await.unwrap().consumer, "e0");
        assert_eq!(stalled.recv().await.unwrap().consumer, "e1");
        assert!(stalled.try_recv().is_none());
        assert_eq!(hub.stats().dropped_for_subscribers, 3);

        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn publish_drops_when_queue_is_full() {
        let lifecycle = LifecycleController::new();
        let hub = TelemetryHub::start(
            HubConfig {
                queue_capacity: 1,
                subscriber_capacity: 4,
            },
            &lifecycle,
        );

        // The dispatch loop has not run yet on this single-threaded runtime.
        hub.publish(event("kept")).unwrap();
        assert_eq!(hub.publish(event("lost")), Err(PublishError::QueueFull));

        let stats = hub.stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.dropped_at_publish, 1);

        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_subscriptions_and_refuses_new_ones() {
        let (lifecycle, hub) = start(HubConfig::default());
        let mut logs = hub.subscribe_logs().unwrap();
        let mut stats = hub
            .subscribe_statistics(AggregationInterval::from_secs(60).unwrap())
            .unwrap();

        hub.publish(event("before")).unwrap();
        lifecycle.shutdown().await;

        assert_eq!(logs.recv().await.unwrap().consumer, "before");
        assert!(logs.recv().await.is_none());
        assert!(stats.recv().await.is_none());

        assert!(!hub.is_accepting());
        assert_eq!(
            hub.subscribe_logs().unwrap_err(),
            SubscribeError::ShuttingDown
        );
        assert_eq!(
            hub.subscribe_statistics(AggregationInterval::from_secs(1).unwrap())
                .unwrap_err(),
            SubscribeError::ShuttingDown
        );
        assert_eq!(hub.publish(event("after")), Err(PublishError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn statistics_window_counts_published_samples() {
        let (lifecycle, hub) = start(HubConfig::default());
        let mut stats = hub
            .subscribe_statistics(AggregationInterval::from_secs(1).unwrap())
            .unwrap();

        for _ in 0..4 {
            hub.publish(sample("x")).unwrap();
        }
        for _ in 0..2 {
            hub.publish(sample("y")).unwrap();
        }

        let snapshot = stats.recv().await.unwrap();
        assert_eq!(snapshot.by_consumer["x"], 4);
        assert_eq!(snapshot.by_consumer["y"], 2);
        assert_eq!(snapshot.by_method["/main.Biz/Check"], 6);

        let next = stats.recv().await.unwrap();
        assert!(next.is_empty());

        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_updates_stats() {
        let (lifecycle, hub) = start(HubConfig::default());
        let logs = hub.subscribe_logs().unwrap();
        let stats = hub
            .subscribe_statistics(AggregationInterval::from_secs(1).unwrap())
            .unwrap();
        assert_eq!(hub.stats().total_subscribers(), 2);

        hub.unsubscribe(SubscriptionKind::Logs, logs.id());
        hub.unsubscribe(SubscriptionKind::Logs, logs.id());
        hub.unsubscribe(SubscriptionKind::Statistics, stats.id());
        assert_eq!(hub.stats().total_subscribers(), 0);

        drop(logs);
        drop(stats);
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_completes_promptly() {
        let (lifecycle, hub) = start(HubConfig::default());
        let _logs = hub.subscribe_logs().unwrap();
        tokio::time::timeout(Duration::from_secs(1), lifecycle.shutdown())
            .await
            .unwrap();
    }
}
