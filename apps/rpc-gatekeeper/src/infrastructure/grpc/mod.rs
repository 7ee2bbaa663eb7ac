//! gRPC Front End
//!
//! Serves the `main.Biz` and `main.Admin` services behind an authorizing
//! tower layer.
//!
//! # Architecture
//!
//! Every inbound call passes through the [`interceptor::GatekeeperLayer`]:
//!
//! 1. The `consumer` metadata entry and peer address are read
//! 2. The call gate authorizes the consumer for the route
//! 3. An access event and a stat sample are published to the hub
//! 4. The call continues to the tonic router and its handler
//!
//! `Admin/Logging` and `Admin/Statistics` turn hub subscriptions into
//! server streams; disconnecting drops the subscription.

pub mod interceptor;
pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto;

pub use interceptor::{CONSUMER_METADATA_KEY, Gatekeeper, GatekeeperLayer};
pub use server::{AdminService, BizService, GatekeeperServer};
