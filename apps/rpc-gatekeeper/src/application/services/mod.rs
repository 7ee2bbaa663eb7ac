//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `CallGate`: per-call identity, address, and policy checks followed by
//!   telemetry publication

mod call_gate;

pub use call_gate::{Admission, CallContext, CallGate, Rejection};
