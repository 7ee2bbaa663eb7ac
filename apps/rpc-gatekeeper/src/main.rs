//! RPC Gatekeeper Binary
//!
//! Starts the authorizing gRPC front end and its health endpoint.
//!
//! # Usage
//!
//! ```bash
//! GATEKEEPER_ACL='{"biz_user": ["/main.Biz/Check"], "logger": ["/main.Admin/*"]}' \
//!     cargo run --bin rpc-gatekeeper
//! ```
//!
//! # Environment Variables
//!
//! ## Required (one of)
//! - `GATEKEEPER_ACL`: ACL JSON mapping consumer to permitted methods
//! - `GATEKEEPER_ACL_FILE`: Path to the ACL JSON
//!
//! ## Optional
//! - `GATEKEEPER_GRPC_PORT`: gRPC server port (default: 50051)
//! - `GATEKEEPER_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `GATEKEEPER_PUBLISH_QUEUE_CAPACITY`: Telemetry publish queue (default: 4096)
//! - `GATEKEEPER_SUBSCRIBER_CAPACITY`: Per-subscriber buffer (default: 1024)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: rpc-gatekeeper)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rpc_gatekeeper::infrastructure::broadcast::{HubConfig, TelemetryHub};
use rpc_gatekeeper::infrastructure::grpc::GatekeeperServer;
use rpc_gatekeeper::infrastructure::health::{HealthServer, HealthServerState};
use rpc_gatekeeper::infrastructure::lifecycle::LifecycleController;
use rpc_gatekeeper::infrastructure::telemetry;
use rpc_gatekeeper::{AccessPolicy, GatekeeperConfig, init_metrics};
use tokio::net::TcpListener;
use tokio::signal;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting RPC Gatekeeper");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    // A malformed ACL stops the process here, before anything is served.
    let config = GatekeeperConfig::from_env()?;
    log_config(&config);

    let lifecycle = LifecycleController::new();

    let hub = TelemetryHub::start(HubConfig::from(config.hub.clone()), &lifecycle);
    let policy = Arc::new(AccessPolicy::new(config.acl.clone()));

    // Bind before spawning so a taken port fails startup.
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.server.grpc_port));
    let grpc_listener = TcpListener::bind(grpc_addr).await?;

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        lifecycle.token(),
    );
    lifecycle.spawn("health-server", async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn gRPC server
    let grpc_server = GatekeeperServer::new(policy, hub);
    let grpc_shutdown = lifecycle.token();
    lifecycle.spawn("grpc-server", async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        if let Err(e) = grpc_server.serve(grpc_listener, grpc_shutdown).await {
            tracing::error!(error = %e, "gRPC server error");
        }
        tracing::info!("gRPC server stopped");
    });

    tracing::info!("Gatekeeper ready");

    await_shutdown(&lifecycle).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, lifecycle.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Gatekeeper stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatekeeperConfig) {
    tracing::info!(
        consumers = config.acl.len(),
        grpc_port = config.server.grpc_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        publish_queue_capacity = config.hub.publish_queue_capacity,
        subscriber_capacity = config.hub.subscriber_capacity,
        "Telemetry hub settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then signal cancellation.
#[allow(clippy::expect_used)]
async fn await_shutdown(lifecycle: &LifecycleController) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    lifecycle.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
