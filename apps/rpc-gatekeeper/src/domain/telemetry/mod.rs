//! Call Telemetry Types
//!
//! Value types produced for every authorized call: the access-log
//! [`Event`], the [`StatSample`] folded into statistics windows, and the
//! [`StatSnapshot`] emitted at the end of each window.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::access::MethodPath;

/// Opaque caller identity taken from call metadata.
pub type Consumer = String;

// =============================================================================
// Event
// =============================================================================

/// Access-log record of one authorized call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Caller identity.
    pub consumer: Consumer,
    /// Invoked method.
    pub method: MethodPath,
    /// Caller network address.
    pub host: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(consumer: impl Into<Consumer>, method: MethodPath, host: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
            method,
            host: host.into(),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// One unit of call accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSample {
    /// Caller identity.
    pub consumer: Consumer,
    /// Invoked method.
    pub method: MethodPath,
}

impl StatSample {
    /// Create a sample.
    #[must_use]
    pub fn new(consumer: impl Into<Consumer>, method: MethodPath) -> Self {
        Self {
            consumer: consumer.into(),
            method,
        }
    }
}

/// Per-window call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatCounts {
    /// Calls per consumer.
    pub by_consumer: HashMap<Consumer, u64>,
    /// Calls per method, keyed by `/<service>/<method>`.
    pub by_method: HashMap<String, u64>,
}

impl StatCounts {
    /// Fold one sample into the counters.
    pub fn record(&mut self, sample: &StatSample) {
        *self
            .by_consumer
            .entry(sample.consumer.clone())
            .or_insert(0) += 1;
        *self.by_method.entry(sample.method.to_string()).or_insert(0) += 1;
    }

    /// Check if no calls were counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_consumer.is_empty() && self.by_method.is_empty()
    }
}

/// Counters of one elapsed aggregation window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSnapshot {
    /// Calls per consumer.
    pub by_consumer: HashMap<Consumer, u64>,
    /// Calls per method, keyed by `/<service>/<method>`.
    pub by_method: HashMap<String, u64>,
    /// When the window closed.
    pub timestamp: DateTime<Utc>,
}

impl StatSnapshot {
    /// Close a window's counters at `timestamp`.
    #[must_use]
    pub fn from_counts(counts: StatCounts, timestamp: DateTime<Utc>) -> Self {
        Self {
            by_consumer: counts.by_consumer,
            by_method: counts.by_method,
            timestamp,
        }
    }

    /// Total calls counted in the window.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.by_consumer.values().sum()
    }

    /// Check if the window saw no calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_consumer.is_empty() && self.by_method.is_empty()
    }
}

/// Length of a statistics window, in whole seconds (at least one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationInterval(NonZeroU64);

impl AggregationInterval {
    /// Create an interval of `secs` seconds; `None` for zero.
    #[must_use]
    pub fn from_secs(secs: u64) -> Option<Self> {
        NonZeroU64::new(secs).map(Self)
    }

    /// Interval length in seconds.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0.get()
    }

    /// Interval length as a duration.
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_secs(self.0.get())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(consumer: &str, method: &str) -> StatSample {
        StatSample::new(consumer, MethodPath::parse(method).unwrap())
    }

    #[test]
    fn counts_accumulate_by_consumer_and_method() {
        let mut counts = StatCounts::default();
        counts.record(&sample("x", "/main.Biz/Check"));
        counts.record(&sample("x", "/main.Biz/Add"));
        counts.record(&sample("y", "/main.Biz/Check"));

        assert_eq!(counts.by_consumer["x"], 2);
        assert_eq!(counts.by_consumer["y"], 1);
        assert_eq!(counts.by_method["/main.Biz/Check"], 2);
        assert_eq!(counts.by_method["/main.Biz/Add"], 1);
    }

    #[test]
    fn snapshot_total_and_empty() {
        let mut counts = StatCounts::default();
        assert!(counts.is_empty());
        let empty = StatSnapshot::from_counts(counts.clone(), Utc::now());
        assert!(empty.is_empty());
        assert_eq!(empty.total(), 0);

        counts.record(&sample("x", "/s/m"));
        counts.record(&sample("y", "/s/m"));
        let snapshot = StatSnapshot::from_counts(counts, Utc::now());
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.total(), 2);
    }

    #[test]
    fn interval_rejects_zero() {
        assert!(AggregationInterval::from_secs(0).is_none());
        let interval = AggregationInterval::from_secs(3).unwrap();
        assert_eq!(interval.as_secs(), 3);
        assert_eq!(interval.as_duration(), Duration::from_secs(3));
    }
}
