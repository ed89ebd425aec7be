use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sonic_rs::{Value, json};
use stage_bridge::core::{BackoffConfig, BridgeClientConfig, BridgeError, SessionState, WsFrame};
use stage_bridge::testing::{MockServer, MockTransport};
use stage_bridge::{BridgeClient, SubscriptionHandle};

const BRIDGE: &str = "ws://bridge.test/ws";
const WAIT: Duration = Duration::from_secs(3);

fn client() -> (BridgeClient<MockTransport>, MockServer) {
    let (transport, server) = MockTransport::channel_pair();
    let config = BridgeClientConfig {
        backoff: BackoffConfig {
            base: Duration::from_millis(30),
            cap: Duration::from_millis(300),
            factor: 1.5,
        },
        close_timeout: Duration::from_millis(200),
        ..BridgeClientConfig::default()
    };
    (BridgeClient::with_transport(transport, config), server)
}

fn collector() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value: &Value| sink.lock().unwrap().push(value.clone()))
}

async fn wait_open(handle: &SubscriptionHandle<MockTransport>) {
    let deadline = Instant::now() + WAIT;
    loop {
        let status = handle.status().await.expect("status");
        if status.state == SessionState::Open {
            return;
        }
        assert!(Instant::now() < deadline, "session never opened: {status:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_len(seen: &Arc<Mutex<Vec<Value>>>, len: usize) {
    let deadline = Instant::now() + WAIT;
    while seen.lock().unwrap().len() < len {
        assert!(Instant::now() < deadline, "expected {len} values");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejects_empty_arguments() {
    let (client, server) = client();

    let err = client.subscribe(BRIDGE, "", |_| {}).await.err();
    assert!(matches!(err, Some(BridgeError::InvalidArgument(_))));
    let err = client.subscribe("  ", "ui", |_| {}).await.err();
    assert!(matches!(err, Some(BridgeError::InvalidArgument(_))));

    assert_eq!(client.active_subscriptions().await, 0);
    assert_eq!(server.connect_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identity_is_percent_encoded_in_target() {
    let (client, mut server) = client();
    let handle = client
        .subscribe(BRIDGE, "ui/main panel", |_| {})
        .await
        .unwrap();

    let conn = server.next_connection(WAIT).await.expect("connection");
    assert_eq!(conn.url, "ws://bridge.test/ws?actorid=ui%2Fmain%20panel");
    assert_eq!(handle.target(), conn.url);
    handle.unsubscribe().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribers_share_one_session_and_see_values_in_order() {
    let (client, mut server) = client();
    let (seen_a, on_a) = collector();
    let (seen_b, on_b) = collector();

    let a = client.subscribe(BRIDGE, "ui", on_a).await.unwrap();
    let b = client.subscribe(BRIDGE, "ui", on_b).await.unwrap();
    let conn = server.next_connection(WAIT).await.expect("connection");
    wait_open(&a).await;

    assert_eq!(client.active_subscriptions().await, 1);
    assert_eq!(server.connect_count(), 1);

    for n in 0..3 {
        conn.send_text(format!(r#"{{"n":{n}}}"#)).unwrap();
    }
    wait_len(&seen_a, 3).await;
    wait_len(&seen_b, 3).await;

    let expected = vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})];
    assert_eq!(*seen_a.lock().unwrap(), expected);
    assert_eq!(*seen_b.lock().unwrap(), expected);
    assert_eq!(a.latest(), Some(json!({"n": 2})));
    assert_eq!(b.watch().borrow().clone(), Some(json!({"n": 2})));

    a.unsubscribe().await;
    b.unsubscribe().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_unsubscribe_closes_without_retry() {
    let (client, mut server) = client();
    let (seen_a, on_a) = collector();

    let a = client.subscribe(BRIDGE, "ui", on_a).await.unwrap();
    let b = client.subscribe(BRIDGE, "ui", |_| {}).await.unwrap();
    let mut conn = server.next_connection(WAIT).await.expect("connection");
    wait_open(&a).await;

    // One subscriber leaving keeps the session alive for the other.
    b.unsubscribe().await;
    b.unsubscribe().await;
    assert_eq!(client.active_subscriptions().await, 1);
    conn.send_text("1").unwrap();
    wait_len(&seen_a, 1).await;

    a.unsubscribe().await;
    assert!(matches!(
        conn.recv_outbound_timeout(WAIT).await,
        Some(WsFrame::Close(_))
    ));
    assert_eq!(client.active_subscriptions().await, 0);

    conn.drop_socket();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connect_count(), 1);

    a.unsubscribe().await;
    assert_eq!(seen_a.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscription_recovers_after_socket_loss() {
    let (client, mut server) = client();
    let (seen, on_value) = collector();

    let handle = client.subscribe(BRIDGE, "ui", on_value).await.unwrap();
    let mut first = server.next_connection(WAIT).await.expect("first");
    wait_open(&handle).await;
    first.send_text(r#""before""#).unwrap();
    wait_len(&seen, 1).await;

    first.fail("connection reset by peer").unwrap();
    let second = server.next_connection(WAIT).await.expect("reconnect");
    wait_open(&handle).await;
    second.send_text(r#""after""#).unwrap();
    wait_len(&seen, 2).await;

    assert_eq!(*seen.lock().unwrap(), vec![json!("before"), json!("after")]);
    let status = handle.status().await.unwrap();
    assert_eq!(status.epoch, 2);
    assert_eq!(status.stats.transport_errors, 1);

    // A frame queued on the dead socket never reaches subscribers.
    let _ = first.send_text(r#""stale""#);
    first.drop_socket();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().unwrap().len(), 2);

    handle.unsubscribe().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_every_session() {
    let (client, mut server) = client();
    let ui = client.subscribe(BRIDGE, "ui", |_| {}).await.unwrap();
    let _log = client.subscribe(BRIDGE, "log", |_| {}).await.unwrap();
    let _c1 = server.next_connection(WAIT).await.expect("ui");
    let _c2 = server.next_connection(WAIT).await.expect("log");
    wait_open(&ui).await;
    assert_eq!(client.active_subscriptions().await, 2);

    client.shutdown().await;
    assert_eq!(client.active_subscriptions().await, 0);
    assert!(ui.status().await.is_err());

    // Handles outliving the client are inert.
    ui.unsubscribe().await;
}
