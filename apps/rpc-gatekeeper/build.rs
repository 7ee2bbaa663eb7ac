//! Build Script for RPC Gatekeeper
//!
//! Generates the tonic client and server stubs for the `Biz` and `Admin`
//! services. Message types are plain `prost` derives in
//! `src/infrastructure/grpc/proto.rs`, so no protobuf toolchain is needed.

use std::env;

use tonic_build::manual::{Builder, Method, Service};

const MESSAGES: &str = "crate::infrastructure::grpc::proto";
const CODEC: &str = "tonic_prost::ProstCodec";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Emit cfg for coverage detection
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }

    let biz = Service::builder()
        .name("Biz")
        .package("main")
        .method(unary("check", "Check"))
        .method(unary("add", "Add"))
        .method(unary("test", "Test"))
        .build();

    let admin = Service::builder()
        .name("Admin")
        .package("main")
        .method(
            Method::builder()
                .name("logging")
                .route_name("Logging")
                .input_type(format!("{MESSAGES}::Nothing"))
                .output_type(format!("{MESSAGES}::Event"))
                .codec_path(CODEC)
                .server_streaming()
                .build(),
        )
        .method(
            Method::builder()
                .name("statistics")
                .route_name("Statistics")
                .input_type(format!("{MESSAGES}::StatInterval"))
                .output_type(format!("{MESSAGES}::Stat"))
                .codec_path(CODEC)
                .server_streaming()
                .build(),
        )
        .build();

    Builder::new().compile(&[biz, admin]);
}

fn unary(name: &str, route: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("{MESSAGES}::Nothing"))
        .output_type(format!("{MESSAGES}::Nothing"))
        .codec_path(CODEC)
        .build()
}
