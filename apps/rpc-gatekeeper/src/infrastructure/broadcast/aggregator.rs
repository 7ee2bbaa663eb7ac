//! Statistics Aggregator
//!
//! Folds stat samples into per-subscription windows and emits a snapshot
//! to each statistics subscriber when its window elapses.
//!
//! Every subscription carries its own [`StatWindow`] because each caller
//! picks its own interval. One timer task serves all windows: it sleeps
//! until the earliest deadline, flushes every due window, and re-arms.
//! Counting and flushing take the same window lock, so a sample lands in
//! exactly one of two adjacent windows.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::registry::{
    SubscribeError, Subscription, SubscriptionId, SubscriptionKind, SubscriptionRegistry,
};
use crate::domain::telemetry::{AggregationInterval, StatCounts, StatSample, StatSnapshot};
use crate::infrastructure::metrics;

// =============================================================================
// Window
// =============================================================================

#[derive(Debug)]
struct WindowState {
    counts: StatCounts,
    deadline: Instant,
}

/// Counters of one statistics subscription's current window.
#[derive(Debug)]
pub struct StatWindow {
    interval: AggregationInterval,
    state: Mutex<WindowState>,
}

impl StatWindow {
    fn new(interval: AggregationInterval, now: Instant) -> Self {
        Self {
            interval,
            state: Mutex::new(WindowState {
                counts: StatCounts::default(),
                deadline: now + interval.as_duration(),
            }),
        }
    }

    /// Window length.
    #[must_use]
    pub const fn interval(&self) -> AggregationInterval {
        self.interval
    }

    fn accumulate(&self, sample: &StatSample) {
        self.state.lock().counts.record(sample);
    }

    fn deadline(&self) -> Instant {
        self.state.lock().deadline
    }

    /// Take the counts and open the next window if the deadline has passed.
    ///
    /// Windows skipped while the timer was late are not emitted separately.
    fn flush_if_due(&self, now: Instant) -> Option<StatCounts> {
        let mut state = self.state.lock();
        if state.deadline > now {
            return None;
        }
        let period = self.interval.as_duration();
        while state.deadline <= now {
            state.deadline += period;
        }
        Some(std::mem::take(&mut state.counts))
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Process-wide statistics aggregator.
#[derive(Debug)]
pub struct StatisticsAggregator {
    registry: Arc<SubscriptionRegistry<StatSnapshot, StatWindow>>,
    rearm: Notify,
    emitted: AtomicU64,
}

impl StatisticsAggregator {
    /// Create an aggregator whose subscribers buffer up to `capacity`
    /// undelivered snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new(
                SubscriptionKind::Statistics,
                capacity,
            )),
            rearm: Notify::new(),
            emitted: AtomicU64::new(0),
        }
    }

    /// Open a statistics subscription whose window starts now and counts
    /// samples with sequence number `start_seq()` and later.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError::ShuttingDown` once the aggregator has stopped.
    pub fn subscribe(
        &self,
        start_seq: impl FnOnce() -> u64,
        interval: AggregationInterval,
    ) -> Result<Subscription<StatSnapshot>, SubscribeError> {
        let window = StatWindow::new(interval, Instant::now());
        let subscription = self.registry.register(start_seq, window)?;
        self.rearm.notify_one();
        tracing::info!(
            subscription_id = subscription.id(),
            interval_secs = interval.as_secs(),
            "Statistics subscription opened"
        );
        Ok(subscription)
    }

    /// Remove a statistics subscription. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.remove(id);
    }

    /// Count one sample, published with sequence number `seq`, in every
    /// window that observes it.
    pub fn accumulate(&self, seq: u64, sample: &StatSample) {
        self.registry.for_each(|subscriber| {
            if subscriber.observes(seq) {
                subscriber.state().accumulate(sample);
            }
        });
    }

    /// Flush every window due at `now`, emitting one snapshot per window.
    ///
    /// Returns how many snapshots were delivered.
    pub fn tick(&self, now: Instant) -> u64 {
        let timestamp = Utc::now();
        let mut delivered = 0;
        self.registry.for_each(|subscriber| {
            if let Some(counts) = subscriber.state().flush_if_due(now) {
                let snapshot = StatSnapshot::from_counts(counts, timestamp);
                if self.registry.offer(subscriber, snapshot) {
                    delivered += 1;
                }
            }
        });

        if delivered > 0 {
            self.emitted.fetch_add(delivered, Ordering::Relaxed);
            metrics::record_snapshots_emitted(delivered);
        }
        delivered
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        self.registry.for_each(|subscriber| {
            let deadline = subscriber.state().deadline();
            next = Some(next.map_or(deadline, |current| current.min(deadline)));
        });
        next
    }

    /// Timer loop. Runs until `cancel` fires, then closes every statistics
    /// subscription without a final partial snapshot.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::debug!("Statistics timer started");

        loop {
            let next = self.next_deadline();
            let sleep = async move {
                match next {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.rearm.notified() => {}
                () = sleep => {
                    self.tick(Instant::now());
                }
            }
        }

        self.close();
        tracing::debug!("Statistics timer stopped");
    }

    /// Refuse new subscribers and end every statistics stream.
    pub fn close(&self) {
        self.registry.close();
    }

    /// Number of live statistics subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Check if there are no statistics subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Snapshots delivered so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Snapshots dropped for lagging subscribers.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.registry.dropped()
    }
}

// =============================================================================
// Tests
// =============================================================================
