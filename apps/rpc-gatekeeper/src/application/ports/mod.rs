//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`TelemetrySink`]: accepts access-log events and statistics samples
//!   for broadcast to admin subscribers

use crate::domain::telemetry::{Event, StatSample};

/// Destination for call telemetry.
///
/// Implementations must never block the caller: a full or closed sink
/// reports an error immediately instead of waiting.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySink: Send + Sync {
    /// Publish an access-log event.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if the sink cannot accept the event.
    fn publish_event(&self, event: Event) -> Result<(), PublishError>;

    /// Publish a statistics sample.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if the sink cannot accept the sample.
    fn publish_sample(&self, sample: StatSample) -> Result<(), PublishError>;
}

/// Telemetry publish failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The internal queue is at capacity; the item was dropped.
    #[error("telemetry queue is full")]
    QueueFull,

    /// The sink is shut down.
    #[error("telemetry sink is closed")]
    Closed,
}
