//! gRPC Server Implementation
//!
//! Implements the `Biz` pass-through service and the `Admin` telemetry
//! streams, and assembles them behind the [`GatekeeperLayer`].

use std::pin::Pin;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use super::interceptor::GatekeeperLayer;
use super::proto::{
    self, Nothing, StatInterval, admin_server::Admin, admin_server::AdminServer, biz_server::Biz,
    biz_server::BizServer,
};
use crate::application::services::CallGate;
use crate::domain::access::AccessPolicy;
use crate::domain::telemetry::{AggregationInterval, Event, StatSnapshot};
use crate::infrastructure::broadcast::{SharedTelemetryHub, SubscribeError};

// =============================================================================
// Type Aliases
// =============================================================================

type RpcResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

impl From<SubscribeError> for Status {
    fn from(err: SubscribeError) -> Self {
        match err {
            SubscribeError::ShuttingDown => Self::unavailable(err.to_string()),
            SubscribeError::InvalidInterval => Self::invalid_argument(err.to_string()),
        }
    }
}

// =============================================================================
// Biz Service
// =============================================================================

/// Business service; every method returns its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct BizService;

#[tonic::async_trait]
impl Biz for BizService {
    async fn check(&self, request: Request<Nothing>) -> RpcResult<Nothing> {
        Ok(Response::new(request.into_inner()))
    }

    async fn add(&self, request: Request<Nothing>) -> RpcResult<Nothing> {
        Ok(Response::new(request.into_inner()))
    }

    async fn test(&self, request: Request<Nothing>) -> RpcResult<Nothing> {
        Ok(Response::new(request.into_inner()))
    }
}

// =============================================================================
// Admin Service
// =============================================================================

/// Admin service streaming access-log events and statistics.
#[derive(Debug, Clone)]
pub struct AdminService {
    hub: SharedTelemetryHub,
}

impl AdminService {
    /// Create an admin service reading from `hub`.
    #[must_use]
    pub const fn new(hub: SharedTelemetryHub) -> Self {
        Self { hub }
    }
}

#[tonic::async_trait]
impl Admin for AdminService {
    type LoggingStream = BoxedStream<proto::Event>;
    type StatisticsStream = BoxedStream<proto::Stat>;

    async fn logging(&self, _request: Request<Nothing>) -> RpcResult<Self::LoggingStream> {
        let subscription = self.hub.subscribe_logs()?;

        // Dropping the stream on disconnect drops the subscription with it.
        let stream = subscription.map(|event| Ok::<_, Status>(event_to_proto(&event)));
        Ok(Response::new(Box::pin(stream) as Self::LoggingStream))
    }

    async fn statistics(
        &self,
        request: Request<StatInterval>,
    ) -> RpcResult<Self::StatisticsStream> {
        let interval = AggregationInterval::from_secs(request.into_inner().interval_seconds)
            .ok_or(SubscribeError::InvalidInterval)?;
        let subscription = self.hub.subscribe_statistics(interval)?;

        let stream = subscription.map(|snapshot| Ok::<_, Status>(snapshot_to_proto(snapshot)));
        Ok(Response::new(Box::pin(stream) as Self::StatisticsStream))
    }
}

// =============================================================================
// Server Assembly
// =============================================================================

/// The gatekeeper gRPC server: both services behind the interceptor layer.
#[derive(Debug, Clone)]
pub struct GatekeeperServer {
    policy: Arc<AccessPolicy>,
    hub: SharedTelemetryHub,
}

impl GatekeeperServer {
    /// Create a server admitting calls with `policy` and recording them
    /// into `hub`.
    #[must_use]
    pub const fn new(policy: Arc<AccessPolicy>, hub: SharedTelemetryHub) -> Self {
        Self { policy, hub }
    }

    /// Serve on `listener` until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the server fails.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        let gate = CallGate::new(self.policy, self.hub.clone());
        let layer = GatekeeperLayer::new(Arc::new(gate));

        Server::builder()
            .layer(layer)
            .add_service(BizServer::new(BizService))
            .add_service(AdminServer::new(AdminService::new(self.hub)))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
    }
}

// =============================================================================
// Conversion Functions
// =============================================================================

fn event_to_proto(event: &Event) -> proto::Event {
    proto::Event {
        timestamp: event.timestamp.timestamp(),
        consumer: event.consumer.clone(),
        method: event.method.to_string(),
        host: event.host.clone(),
    }
}

fn snapshot_to_proto(snapshot: StatSnapshot) -> proto::Stat {
    proto::Stat {
        timestamp: snapshot.timestamp.timestamp(),
        by_method: snapshot.by_method,
        by_consumer: snapshot.by_consumer,
    }
}

// =============================================================================
// Tests
// =============================================================================
