//! Wire messages of the `main` package and the generated service stubs.

use std::collections::HashMap;

/// Empty payload of the `Biz` methods and of `Admin/Logging`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Nothing {
    #[prost(bool, tag = "1")]
    pub dummy: bool,
}

/// Access-log record streamed by `Admin/Logging`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Event {
    /// Unix seconds.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(string, tag = "2")]
    pub consumer: String,
    #[prost(string, tag = "3")]
    pub method: String,
    #[prost(string, tag = "4")]
    pub host: String,
}

/// Request of `Admin/Statistics`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct StatInterval {
    #[prost(uint64, tag = "1")]
    pub interval_seconds: u64,
}

/// One statistics window streamed by `Admin/Statistics`.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Stat {
    /// Unix seconds at window close.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(map = "string, uint64", tag = "2")]
    pub by_method: HashMap<String, u64>,
    #[prost(map = "string, uint64", tag = "3")]
    pub by_consumer: HashMap<String, u64>,
}

include!(concat!(env!("OUT_DIR"), "/main.Biz.rs"));
include!(concat!(env!("OUT_DIR"), "/main.Admin.rs"));
