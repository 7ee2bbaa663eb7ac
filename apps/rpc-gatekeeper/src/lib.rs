#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! RPC Gatekeeper - Authorizing gRPC Front End
//!
//! A gRPC server that authorizes every call against a per-consumer access
//! control list and streams call telemetry to live admin subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `access`: Method paths, permission patterns, the access policy
//!   - `telemetry`: Access-log events, stat samples, snapshots
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The `TelemetrySink` publish boundary
//!   - `services`: The call gate (identity, address, policy, publish)
//!
//! - **Infrastructure**: Adapters and runtime
//!   - `broadcast`: Telemetry hub, subscription registry, statistics aggregator
//!   - `lifecycle`: Cancellation token and task ownership
//!   - `grpc`: Interceptor layer, `Biz` and `Admin` services
//!   - `config`: Environment configuration and ACL loading
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!            ┌──────────────┐  admitted   ┌────────────┐
//! Client ───►│  Gatekeeper  │────────────►│  Biz/Admin │
//!            │    layer     │             │  handlers  │
//!            └──────┬───────┘             └─────▲──────┘
//!                   │ Event + StatSample        │ subscriptions
//!                   ▼                           │
//!            ┌──────────────┐   fan-out   ┌─────┴──────┐
//!            │ TelemetryHub │────────────►│ Log / Stat │
//!            │ (dispatch)   │             │ subscribers│
//!            └──────────────┘             └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Access rules and telemetry types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::access::{
    AccessControlList, AccessPolicy, AclError, MethodPath, PermissionPattern, PolicyError,
};
pub use domain::telemetry::{AggregationInterval, Consumer, Event, StatSample, StatSnapshot};

// Application
pub use application::ports::{PublishError, TelemetrySink};
pub use application::services::{Admission, CallContext, CallGate, Rejection};

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatekeeperConfig, HubSettings, ServerSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Telemetry hub (for integration tests)
pub use infrastructure::broadcast::{
    HubConfig, HubStats, SharedTelemetryHub, SubscribeError, Subscription, SubscriptionKind,
    TelemetryHub,
};

// Lifecycle
pub use infrastructure::lifecycle::LifecycleController;

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    CONSUMER_METADATA_KEY, GatekeeperLayer, GatekeeperServer, proto,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
