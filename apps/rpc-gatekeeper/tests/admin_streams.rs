//! Admin Stream Integration Tests
//!
//! Exercises `Admin/Logging` and `Admin/Statistics` end to end: event
//! order, late subscribers, per-window counts, disconnects and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tonic::codec::Streaming;
use tonic::transport::Channel;
use tonic::{Code, Request};

use rpc_gatekeeper::{
    AccessControlList, AccessPolicy, CONSUMER_METADATA_KEY, Event, GatekeeperServer, HubConfig,
    LifecycleController, MethodPath, PublishError, TelemetryHub,
    proto::{self, Nothing, StatInterval, admin_client::AdminClient, biz_client::BizClient},
};

const ACL: &str = r#"{
    "logger": ["/main.Admin/Logging"],
    "stat": ["/main.Admin/Statistics"],
    "biz_user": ["/main.Biz/Check", "/main.Biz/Add"],
    "biz_admin": ["/main.Biz/*"]
}"#;

struct TestServer {
    channel: Channel,
    hub: Arc<TelemetryHub>,
    lifecycle: LifecycleController,
}

/// Start a gatekeeper on a random port and connect a channel to it.
async fn setup_test_server() -> TestServer {
    let lifecycle = LifecycleController::new();
    let hub = TelemetryHub::start(HubConfig::default(), &lifecycle);
    let policy = Arc::new(AccessPolicy::new(AccessControlList::from_json(ACL).unwrap()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = GatekeeperServer::new(policy, Arc::clone(&hub));
    let shutdown = lifecycle.token();
    lifecycle.spawn("grpc-server", async move {
        server.serve(listener, shutdown).await.unwrap();
    });

    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();

    TestServer {
        channel,
        hub,
        lifecycle,
    }
}

fn as_consumer<T>(consumer: &str, message: T) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(CONSUMER_METADATA_KEY, consumer.parse().unwrap());
    request
}

async fn open_logs(channel: &Channel) -> Streaming<proto::Event> {
    AdminClient::new(channel.clone())
        .logging(as_consumer("logger", Nothing::default()))
        .await
        .unwrap()
        .into_inner()
}

async fn open_stats(channel: &Channel, interval_seconds: u64) -> Streaming<proto::Stat> {
    AdminClient::new(channel.clone())
        .statistics(as_consumer("stat", StatInterval { interval_seconds }))
        .await
        .unwrap()
        .into_inner()
}

async fn next_message<T>(stream: &mut Streaming<T>) -> T {
    timeout(Duration::from_secs(2), stream.message())
        .await
        .expect("timeout waiting for message")
        .unwrap()
        .expect("stream ended")
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..40 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    check()
}

// =============================================================================
// Logging
// =============================================================================

#[tokio::test]
async fn test_logging_streams_events_in_call_order() {
    let server = setup_test_server().await;
    let mut biz = BizClient::new(server.channel.clone());
    let mut logs = open_logs(&server.channel).await;

    biz.check(as_consumer("biz_user", Nothing::default()))
        .await
        .unwrap();
    biz.add(as_consumer("biz_user", Nothing::default()))
        .await
        .unwrap();
    biz.test(as_consumer("biz_admin", Nothing::default()))
        .await
        .unwrap();

    let received = [
        next_message(&mut logs).await,
        next_message(&mut logs).await,
        next_message(&mut logs).await,
    ];
    let calls: Vec<_> = received
        .iter()
        .map(|e| (e.consumer.as_str(), e.method.as_str()))
        .collect();
    assert_eq!(
        calls,
        [
            ("biz_user", "/main.Biz/Check"),
            ("biz_user", "/main.Biz/Add"),
            ("biz_admin", "/main.Biz/Test"),
        ]
    );
    for event in &received {
        assert!(event.host.starts_with("127.0.0.1:"));
        assert!(event.timestamp > 0);
    }

    drop(logs);
    timeout(Duration::from_secs(5), server.lifecycle.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_late_logger_sees_only_later_events() {
    let server = setup_test_server().await;
    let mut biz = BizClient::new(server.channel.clone());

    let mut early = open_logs(&server.channel).await;
    biz.check(as_consumer("biz_user", Nothing::default()))
        .await
        .unwrap();

    let mut late = open_logs(&server.channel).await;
    biz.add(as_consumer("biz_user", Nothing::default()))
        .await
        .unwrap();

    // The early logger also observes the late logger opening its stream.
    let early_methods = [
        next_message(&mut early).await.method,
        next_message(&mut early).await.method,
        next_message(&mut early).await.method,
    ];
    assert_eq!(
        early_methods,
        ["/main.Biz/Check", "/main.Admin/Logging", "/main.Biz/Add"]
    );

    let first_late = next_message(&mut late).await;
    assert_eq!(first_late.method, "/main.Biz/Add");

    drop(early);
    drop(late);
    timeout(Duration::from_secs(5), server.lifecycle.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_disconnect_releases_subscription() {
    let server = setup_test_server().await;

    let logs = open_logs(&server.channel).await;
    let stats = open_stats(&server.channel, 1).await;
    assert!(eventually(|| server.hub.stats().total_subscribers() == 2).await);

    drop(logs);
    drop(stats);
    assert!(eventually(|| server.hub.stats().total_subscribers() == 0).await);

    timeout(Duration::from_secs(5), server.lifecycle.shutdown())
        .await
        .unwrap();
}

// =============================================================================
// Statistics
// =============================================================================

#[tokio::test]
async fn test_statistics_counts_calls_per_window() {
    let server = setup_test_server().await;
    let mut biz = BizClient::new(server.channel.clone());
    let mut stats = open_stats(&server.channel, 1).await;

    for _ in 0..3 {
        biz.check(as_consumer("biz_user", Nothing::default()))
            .await
            .unwrap();
    }
    for _ in 0..2 {
        biz.add(as_consumer("biz_admin", Nothing::default()))
            .await
            .unwrap();
    }

    // The calls may straddle a window boundary; sum until all are seen.
    let mut by_consumer: HashMap<String, u64> = HashMap::new();
    let mut by_method: HashMap<String, u64> = HashMap::new();
    while by_consumer.values().sum::<u64>() < 5 {
        let snapshot = next_message(&mut stats).await;
        for (consumer, count) in snapshot.by_consumer {
            *by_consumer.entry(consumer).or_default() += count;
        }
        for (method, count) in snapshot.by_method {
            *by_method.entry(method).or_default() += count;
        }
    }

    assert_eq!(by_consumer.get("biz_user"), Some(&3));
    assert_eq!(by_consumer.get("biz_admin"), Some(&2));
    assert_eq!(by_method.get("/main.Biz/Check"), Some(&3));
    assert_eq!(by_method.get("/main.Biz/Add"), Some(&2));
    assert!(!by_consumer.contains_key("stat"));

    // No further calls: the next window is empty.
    let empty = next_message(&mut stats).await;
    assert!(empty.by_consumer.is_empty());
    assert!(empty.by_method.is_empty());

    drop(stats);
    timeout(Duration::from_secs(5), server.lifecycle.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_statistics_rejects_zero_interval() {
    let server = setup_test_server().await;
    let mut admin = AdminClient::new(server.channel.clone());

    let status = admin
        .statistics(as_consumer("stat", StatInterval { interval_seconds: 0 }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(server.hub.stats().stat_subscribers, 0);

    timeout(Duration::from_secs(5), server.lifecycle.shutdown())
        .await
        .unwrap();
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let server = setup_test_server().await;
    let mut logs = open_logs(&server.channel).await;
    let mut stats = open_stats(&server.channel, 60).await;

    server.lifecycle.cancel();

    let late = Event::new(
        "biz_user",
        MethodPath::parse("/main.Biz/Check").unwrap(),
        "127.0.0.1:1",
    );
    assert_eq!(server.hub.publish(late), Err(PublishError::Closed));

    // The statistics call was admitted after the logger registered.
    let queued = next_message(&mut logs).await;
    assert_eq!(queued.method, "/main.Admin/Statistics");

    let end = timeout(Duration::from_secs(2), logs.message())
        .await
        .expect("logging stream did not end");
    assert!(matches!(end, Ok(None)));

    let end = timeout(Duration::from_secs(2), stats.message())
        .await
        .expect("statistics stream did not end");
    assert!(matches!(end, Ok(None)));

    timeout(Duration::from_secs(5), server.lifecycle.shutdown())
        .await
        .expect("shutdown timed out");
    assert!(!server.hub.is_accepting());
}
