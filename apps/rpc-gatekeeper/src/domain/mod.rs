//! Domain Layer - Access control and call telemetry types.
//!
//! This layer contains the core types for authorizing calls and describing
//! what was called, with no transport or runtime dependencies.

/// Access control list, permission patterns, and the access policy.
pub mod access;

/// Access-log events and statistics value types.
pub mod telemetry;
