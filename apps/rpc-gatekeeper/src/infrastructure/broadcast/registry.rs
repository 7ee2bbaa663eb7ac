//! Subscription Registry
//!
//! Tracks the live subscribers of one telemetry kind. Each subscriber owns
//! a bounded channel; the registry holds the sending half.
//!
//! # Locking
//!
//! The subscriber list sits behind a single `RwLock`:
//! - write-locked only to register, remove, or close
//! - read-locked while delivering, so registration and removal happen
//!   between delivery passes and never during one
//!
//! Delivery uses `try_send`: a subscriber whose channel is full loses the
//! new item (counted) and the pass continues with the next subscriber.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::infrastructure::metrics;

/// Unique identifier of a subscription within its registry.
pub type SubscriptionId = u64;

/// Telemetry stream a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Access-log events.
    Logs,
    /// Statistics snapshots.
    Statistics,
}

impl SubscriptionKind {
    /// Label for metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Statistics => "statistics",
        }
    }
}

/// Subscription failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The hub is shutting down and accepts no new subscribers.
    #[error("telemetry hub is shutting down")]
    ShuttingDown,

    /// A statistics interval of zero seconds was requested.
    #[error("statistics interval must be at least one second")]
    InvalidInterval,
}

// =============================================================================
// Subscriber
// =============================================================================

/// Registry-side record of one subscription.
#[derive(Debug)]
pub struct Subscriber<T, S> {
    id: SubscriptionId,
    start_seq: u64,
    tx: mpsc::Sender<T>,
    state: S,
    dropped: AtomicU64,
}

impl<T, S> Subscriber<T, S> {
    /// Subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Per-subscriber state (the statistics window, for statistics).
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Whether an item published with sequence number `seq` is visible to
    /// this subscriber. Items published before registration are not.
    #[must_use]
    pub const fn observes(&self, seq: u64) -> bool {
        seq >= self.start_seq
    }

    /// Items dropped because this subscriber's channel was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
struct RegistryState<T, S> {
    closed: bool,
    subscribers: Vec<Subscriber<T, S>>,
}

/// Live subscriber set for one telemetry kind.
#[derive(Debug)]
pub struct SubscriptionRegistry<T, S = ()> {
    kind: SubscriptionKind,
    capacity: usize,
    next_id: AtomicU64,
    dropped: AtomicU64,
    state: RwLock<RegistryState<T, S>>,
}

impl<T, S> SubscriptionRegistry<T, S>
where
    T: Send + 'static,
    S: Send + Sync + 'static,
{
    /// Create an empty registry whose subscriber channels hold `capacity`
    /// undelivered items.
    #[must_use]
    pub fn new(kind: SubscriptionKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            state: RwLock::new(RegistryState {
                closed: false,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Register a subscriber that observes items with sequence number
    /// `start_seq()` and later.
    ///
    /// `start_seq` is read under the write lock, so an item whose sequence
    /// number it covers cannot be delivered before the subscriber is listed.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError::ShuttingDown` once the registry is closed.
    pub fn register(
        self: &Arc<Self>,
        start_seq: impl FnOnce() -> u64,
        state: S,
    ) -> Result<Subscription<T>, SubscribeError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let count = {
            let mut guard = self.state.write();
            if guard.closed {
                return Err(SubscribeError::ShuttingDown);
            }
            guard.subscribers.push(Subscriber {
                id,
                start_seq: start_seq(),
                tx,
                state,
                dropped: AtomicU64::new(0),
            });
            guard.subscribers.len()
        };

        metrics::set_subscribers(self.kind, count);
        tracing::debug!(kind = self.kind.as_str(), subscription_id = id, "Subscriber registered");

        let registry: Weak<dyn Unregister> = Arc::downgrade(self) as Weak<dyn Unregister>;
        Ok(Subscription {
            id,
            kind: self.kind,
            rx,
            registry: Some(registry),
        })
    }

    /// Remove a subscriber. Removing an unknown id is a no-op.
    pub fn remove(&self, id: SubscriptionId) {
        let (removed, count) = {
            let mut guard = self.state.write();
            let before = guard.subscribers.len();
            guard.subscribers.retain(|s| s.id != id);
            (before != guard.subscribers.len(), guard.subscribers.len())
        };

        if removed {
            metrics::set_subscribers(self.kind, count);
            tracing::debug!(kind = self.kind.as_str(), subscription_id = id, "Subscriber removed");
        }
    }

    /// Close the registry: refuse new subscribers and drop every sender so
    /// each subscriber sees end-of-stream after its buffered items.
    pub fn close(&self) {
        let released = {
            let mut guard = self.state.write();
            guard.closed = true;
            std::mem::take(&mut guard.subscribers)
        };

        metrics::set_subscribers(self.kind, 0);
        tracing::debug!(
            kind = self.kind.as_str(),
            released = released.len(),
            "Subscription registry closed"
        );
    }

    /// Visit every live subscriber under the read lock.
    pub fn for_each(&self, mut f: impl FnMut(&Subscriber<T, S>)) {
        let guard = self.state.read();
        for subscriber in &guard.subscribers {
            f(subscriber);
        }
    }

    /// Offer `item` to one subscriber without waiting.
    ///
    /// Returns `true` if the item was queued.
    pub fn offer(&self, subscriber: &Subscriber<T, S>, item: T) -> bool {
        match subscriber.tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = subscriber.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_subscriber_drop(self.kind);
                tracing::warn!(
                    kind = self.kind.as_str(),
                    subscription_id = subscriber.id,
                    dropped,
                    "Subscriber lagging, item dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().subscribers.len()
    }

    /// Check if there are no live subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the registry has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Total items dropped for slow subscribers.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T, S> SubscriptionRegistry<T, S>
where
    T: Clone + Send + 'static,
    S: Send + Sync + 'static,
{
    /// Deliver `item`, published with sequence number `seq`, to every
    /// subscriber that observes it.
    ///
    /// Returns how many subscribers accepted the item.
    pub fn broadcast(&self, seq: u64, item: &T) -> usize {
        let mut delivered = 0;
        self.for_each(|subscriber| {
            if subscriber.observes(seq) && self.offer(subscriber, item.clone()) {
                delivered += 1;
            }
        });
        delivered
    }
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: SubscriptionId);
}

impl<T, S> Unregister for SubscriptionRegistry<T, S>
where
    T: Send + 'static,
    S: Send + Sync + 'static,
{
    fn unregister(&self, id: SubscriptionId) {
        self.remove(id);
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// A live subscription: the receiving half of a subscriber channel plus
/// the ability to remove itself from its registry.
///
/// The stream ends when the subscription is removed or the hub shuts
/// down. Dropping the handle unsubscribes.
pub struct Subscription<T> {
    id: SubscriptionId,
    kind: SubscriptionKind,
    rx: mpsc::Receiver<T>,
    registry: Option<Weak<dyn Unregister>>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.registry.is_some())
            .finish()
    }
}

impl<T> Subscription<T> {
    /// Subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Telemetry kind this subscription receives.
    #[must_use]
    pub const fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Wait for the next item. Returns `None` at end-of-stream.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next item if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Remove this subscription from its registry. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unregister(self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Tests
// =============================================================================
