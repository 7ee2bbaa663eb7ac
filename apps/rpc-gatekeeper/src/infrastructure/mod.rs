//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process runtime around them.

/// gRPC front end: interceptor layer and services.
pub mod grpc;

/// Telemetry hub, subscription registry, and statistics aggregator.
pub mod broadcast;

/// Process-wide cancellation and task ownership.
pub mod lifecycle;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry integration.
pub mod telemetry;
