//! Call Gate
//!
//! Runs the admission steps for one inbound call, independent of the
//! transport that carries it:
//!
//! 1. Extract the consumer from call metadata
//! 2. Resolve the caller's network address
//! 3. Authorize the consumer for the method
//! 4. Publish an [`Event`] and a [`StatSample`] (fire-and-forget)
//!
//! A rejected call stops before step 4, so nothing is recorded for it.
//! Delegation to the business handler is the caller's job once
//! [`CallGate::admit`] returns an [`Admission`].

use std::net::SocketAddr;
use std::sync::Arc;

use crate::application::ports::TelemetrySink;
use crate::domain::access::{AccessPolicy, MethodPath, PolicyError};
use crate::domain::telemetry::{Event, StatSample};

/// What the transport knows about an inbound call.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Value of the `consumer` metadata entry, if present.
    pub consumer: Option<&'a str>,
    /// Dispatch target, `/<service>/<method>`.
    pub method: &'a str,
    /// Peer address, if the transport could resolve it.
    pub remote_addr: Option<SocketAddr>,
}

/// An admitted call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Caller identity.
    pub consumer: String,
    /// Invoked method.
    pub method: MethodPath,
    /// Caller address.
    pub host: String,
}

/// Terminal rejection states of a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// No consumer in metadata, or an empty one.
    #[error("no consumer in call metadata")]
    Unauthenticated,

    /// The access policy refused the consumer.
    #[error(transparent)]
    Denied(#[from] PolicyError),

    /// The call context could not be read.
    #[error("{0}")]
    Internal(String),
}

impl Rejection {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Denied(PolicyError::UnknownConsumer { .. }) => "unknown_consumer",
            Self::Denied(PolicyError::AccessDenied { .. }) => "access_denied",
            Self::Internal(_) => "internal",
        }
    }
}

/// Authorizes calls and records telemetry for the admitted ones.
pub struct CallGate {
    policy: Arc<AccessPolicy>,
    sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for CallGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGate")
            .field("consumers", &self.policy.acl().len())
            .finish_non_exhaustive()
    }
}

impl CallGate {
    /// Create a gate over `policy` publishing into `sink`.
    #[must_use]
    pub fn new(policy: Arc<AccessPolicy>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self { policy, sink }
    }

    /// Admit or reject one call.
    ///
    /// On admission the call's event and sample have been offered to the
    /// sink; a sink failure is logged and does not affect the call.
    ///
    /// # Errors
    ///
    /// Returns the `Rejection` state the call terminated in.
    pub fn admit(&self, call: &CallContext<'_>) -> Result<Admission, Rejection> {
        let consumer = call
            .consumer
            .filter(|c| !c.is_empty())
            .ok_or(Rejection::Unauthenticated)?;

        let remote_addr = call
            .remote_addr
            .ok_or_else(|| Rejection::Internal("unable to resolve peer address".to_string()))?;

        let method = MethodPath::parse(call.method)
            .ok_or_else(|| Rejection::Internal(format!("malformed method path {:?}", call.method)))?;

        let granted = self.policy.authorize(consumer, &method)?;
        tracing::trace!(consumer, method = %method, pattern = %granted, "Call authorized");

        let admission = Admission {
            consumer: consumer.to_string(),
            method,
            host: remote_addr.to_string(),
        };
        self.record(&admission);

        Ok(admission)
    }

    fn record(&self, admission: &Admission) {
        let event = Event::new(
            admission.consumer.clone(),
            admission.method.clone(),
            admission.host.clone(),
        );
        if let Err(e) = self.sink.publish_event(event) {
            tracing::debug!(error = %e, consumer = %admission.consumer, "Access event not recorded");
        }

        let sample = StatSample::new(admission.consumer.clone(), admission.method.clone());
        if let Err(e) = self.sink.publish_sample(sample) {
            tracing::debug!(error = %e, consumer = %admission.consumer, "Stat sample not recorded");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
