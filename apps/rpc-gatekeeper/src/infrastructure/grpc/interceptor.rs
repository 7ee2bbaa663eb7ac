//! Call Interceptor Layer
//!
//! Tower middleware that runs the [`CallGate`] in front of every gRPC
//! route. It sits below tonic's router, so unary and server-streaming
//! calls are both checked exactly once, when the call is established.
//!
//! Admitted calls reach the handler untouched and its response is
//! returned as-is. Rejected calls are answered here with a trailers-only
//! gRPC error and never reach the handler.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use tonic::Status;
use tonic::transport::server::TcpConnectInfo;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::application::services::{CallContext, CallGate, Rejection};
use crate::infrastructure::metrics;

/// Metadata key carrying the caller identity.
pub const CONSUMER_METADATA_KEY: &str = "consumer";

impl From<Rejection> for Status {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Unauthenticated => Self::unauthenticated(rejection.to_string()),
            Rejection::Denied(reason) => Self::permission_denied(reason.to_string()),
            Rejection::Internal(message) => Self::internal(message),
        }
    }
}

/// Layer installing [`Gatekeeper`] around the router.
#[derive(Debug, Clone)]
pub struct GatekeeperLayer {
    gate: Arc<CallGate>,
}

impl GatekeeperLayer {
    /// Create a layer admitting calls through `gate`.
    #[must_use]
    pub const fn new(gate: Arc<CallGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for GatekeeperLayer {
    type Service = Gatekeeper<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Gatekeeper {
            inner,
            gate: Arc::clone(&self.gate),
        }
    }
}

/// Authorizing service wrapper.
#[derive(Debug, Clone)]
pub struct Gatekeeper<S> {
    inner: S,
    gate: Arc<CallGate>,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for Gatekeeper<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let verdict = {
            let call = CallContext {
                consumer: request
                    .headers()
                    .get(CONSUMER_METADATA_KEY)
                    .and_then(|value| value.to_str().ok()),
                method: request.uri().path(),
                remote_addr: request
                    .extensions()
                    .get::<TcpConnectInfo>()
                    .and_then(TcpConnectInfo::remote_addr),
            };
            self.gate.admit(&call)
        };

        match verdict {
            Ok(admission) => {
                metrics::record_call_admitted();
                let span = tracing::info_span!(
                    "call",
                    call_id = %uuid::Uuid::new_v4(),
                    consumer = %admission.consumer,
                    method = %admission.method,
                    host = %admission.host,
                );

                // The ready service is the one that must handle the call.
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);

                Box::pin(
                    async move {
                        let started = Instant::now();
                        let result = inner.call(request).await;
                        metrics::record_call_duration(started.elapsed());
                        result
                    }
                    .instrument(span),
                )
            }
            Err(rejection) => {
                metrics::record_call_rejected(rejection.reason());
                tracing::info!(
                    method = request.uri().path(),
                    reason = rejection.reason(),
                    error = %rejection,
                    "Call rejected"
                );
                let response = Status::from(rejection).into_http();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use tonic::Code;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::MockTelemetrySink;
    use crate::domain::access::{AccessControlList, AccessPolicy, PolicyError};

    const ACL: &str = r#"{"biz_user": ["/main.Biz/Check"], "admin": ["/main.Admin/*"]}"#;

    fn layer(sink: MockTelemetrySink) -> GatekeeperLayer {
        let acl = AccessControlList::from_json(ACL).unwrap();
        let gate = CallGate::new(Arc::new(AccessPolicy::new(acl)), Arc::new(sink));
        GatekeeperLayer::new(Arc::new(gate))
    }

    fn request(path: &str, consumer: Option<&str>, peer: bool) -> http::Request<()> {
        let mut builder = http::Request::builder().uri(format!("http://localhost{path}"));
        if let Some(consumer) = consumer {
            builder = builder.header(CONSUMER_METADATA_KEY, consumer);
        }
        let mut request = builder.body(()).unwrap();
        if peer {
            let remote: SocketAddr = "10.0.0.7:5555".parse().unwrap();
            request.extensions_mut().insert(TcpConnectInfo {
                local_addr: None,
                remote_addr: Some(remote),
            });
        }
        request
    }

    async fn handler(_request: http::Request<()>) -> Result<http::Response<String>, Infallible> {
        Ok(http::Response::new("handled".to_string()))
    }

    fn status_of(response: &http::Response<String>) -> Option<Status> {
        Status::from_header_map(response.headers())
    }

    #[tokio::test]
    async fn admitted_call_reaches_handler() {
        let mut sink = MockTelemetrySink::new();
        sink.expect_publish_event()
            .times(1)
            .withf(|event| event.host == "10.0.0.7:5555")
            .returning(|_| Ok(()));
        sink.expect_publish_sample().times(1).returning(|_| Ok(()));

        let service = layer(sink).layer(tower::service_fn(handler));
        let response = service
            .oneshot(request("/main.Biz/Check", Some("biz_user"), true))
            .await
            .unwrap();

        assert_eq!(response.body(), "handled");
        assert!(status_of(&response).is_none());
    }

    #[tokio::test]
    async fn missing_consumer_is_unauthenticated() {
        let service = layer(MockTelemetrySink::new()).layer(tower::service_fn(handler));
        let response = service
            .oneshot(request("/main.Biz/Check", None, true))
            .await
            .unwrap();

        assert!(response.body().is_empty());
        assert_eq!(status_of(&response).unwrap().code(), Code::Unauthenticated);
    }

    #[tokio::test]
    async fn denied_call_is_permission_denied() {
        let service = layer(MockTelemetrySink::new()).layer(tower::service_fn(handler));
        let response = service
            .oneshot(request("/main.Biz/Add", Some("biz_user"), true))
            .await
            .unwrap();

        let status = status_of(&response).unwrap();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert!(status.message().contains("/main.Biz/Add"));
    }

    #[tokio::test]
    async fn unknown_consumer_is_permission_denied() {
        let service = layer(MockTelemetrySink::new()).layer(tower::service_fn(handler));
        let response = service
            .oneshot(request("/main.Biz/Check", Some("stranger"), true))
            .await
            .unwrap();

        assert_eq!(status_of(&response).unwrap().code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn missing_peer_is_internal() {
        let service = layer(MockTelemetrySink::new()).layer(tower::service_fn(handler));
        let response = service
            .oneshot(request("/main.Biz/Check", Some("biz_user"), false))
            .await
            .unwrap();

        assert_eq!(status_of(&response).unwrap().code(), Code::Internal);
    }

    #[test]
    fn rejection_status_mapping() {
        assert_eq!(Status::from(Rejection::Unauthenticated).code(), Code::Unauthenticated);
        assert_eq!(
            Status::from(Rejection::Denied(PolicyError::UnknownConsumer {
                consumer: "x".to_string()
            }))
            .code(),
            Code::PermissionDenied
        );
        assert_eq!(
            Status::from(Rejection::Internal("boom".to_string())).code(),
            Code::Internal
        );
    }
}
