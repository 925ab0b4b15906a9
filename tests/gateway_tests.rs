// ABOUTME: End-to-end tests for the reverse-WebSocket gateway over a loopback socket
// ABOUTME: Covers auth, handshake, request/response correlation, event hand-off and teardown

use burrow::gateway::{
    ApiCaller, BotRegistry, CallError, EventSink, GatewayServer, GatewaySettings,
};
use burrow_onebot::ApiRequest;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Harness
// ============================================================================

struct ChannelSink {
    tx: mpsc::UnboundedSender<(Value, i64)>,
}

impl EventSink for ChannelSink {
    fn submit(&self, payload: Value, caller: Arc<dyn ApiCaller>) {
        let _ = self.tx.send((payload, caller.self_id()));
    }
}

struct TestGateway {
    addr: SocketAddr,
    bots: Arc<BotRegistry>,
    events: mpsc::UnboundedReceiver<(Value, i64)>,
    connects: Arc<AtomicUsize>,
}

async fn start_gateway(access_token: Option<&str>, api_timeout: Duration) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let bots = Arc::new(BotRegistry::new());
    let (tx, events) = mpsc::unbounded_channel();
    let connects = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connects);

    let settings = GatewaySettings {
        listen_addr: addr.to_string(),
        access_token: access_token.map(str::to_string),
        api_timeout,
        retry_delay: Duration::from_millis(50),
    };
    let server = GatewayServer::new(
        settings,
        Arc::clone(&bots),
        Arc::new(ChannelSink { tx }),
        Arc::new(move |_self_id: i64| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    tokio::spawn(async move { server.serve(listener).await });

    TestGateway {
        addr,
        bots,
        events,
        connects,
    }
}

async fn connect(addr: SocketAddr, self_id: i64) -> Client {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/onebot/v11/ws", addr))
        .await
        .unwrap();
    send_json(&mut ws, json!({ "self_id": self_id })).await;
    ws
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn same(a: &Arc<dyn ApiCaller>, b: &Arc<dyn ApiCaller>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ============================================================================
// Auth
// ============================================================================

#[tokio::test]
async fn test_missing_token_is_401() {
    let gw = start_gateway(Some("secret"), Duration::from_secs(5)).await;
    let err = tokio_tungstenite::connect_async(format!("ws://{}/", gw.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_wrong_token_is_403() {
    let gw = start_gateway(Some("secret"), Duration::from_secs(5)).await;
    let mut request = format!("ws://{}/", gw.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer nope".parse().unwrap());
    match tokio_tungstenite::connect_async(request).await.unwrap_err() {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 403),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_token_accepted_from_header_or_query() {
    let gw = start_gateway(Some("secret"), Duration::from_secs(5)).await;

    let mut request = format!("ws://{}/", gw.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer secret".parse().unwrap());
    assert!(tokio_tungstenite::connect_async(request).await.is_ok());

    let query = format!("ws://{}/?access_token=secret", gw.addr);
    assert!(tokio_tungstenite::connect_async(query).await.is_ok());
}

// ============================================================================
// Handshake and registry
// ============================================================================

#[tokio::test]
async fn test_handshake_registers_bot_and_runs_hook() {
    let gw = start_gateway(None, Duration::from_secs(5)).await;
    let _ws = connect(gw.addr, 42).await;

    wait_until(|| gw.bots.get(42).is_some()).await;
    assert_eq!(gw.bots.ids(), vec![42]);
    assert_eq!(gw.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_handshake_drops_connection() {
    let gw = start_gateway(None, Duration::from_secs(5)).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", gw.addr))
        .await
        .unwrap();
    send_json(&mut ws, json!({ "self_id": 0 })).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server should hang up");
    assert!(gw.bots.is_empty());
}

#[tokio::test]
async fn test_disconnect_deregisters_bot() {
    let gw = start_gateway(None, Duration::from_secs(5)).await;
    let mut ws = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some()).await;

    ws.close(None).await.unwrap();
    wait_until(|| gw.bots.get(42).is_none()).await;
}

#[tokio::test]
async fn test_reconnect_survives_old_connection_teardown() {
    let gw = start_gateway(None, Duration::from_secs(5)).await;

    let mut first = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some()).await;
    let old = gw.bots.get(42).unwrap();

    let _second = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some_and(|c| !same(&c, &old))).await;
    let current = gw.bots.get(42).unwrap();

    first.close(None).await.unwrap();
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let still = gw.bots.get(42).expect("new connection kept");
    assert!(same(&still, &current));
    assert_eq!(gw.connects.load(Ordering::SeqCst), 2);
}

// ============================================================================
// API calls
// ============================================================================

#[tokio::test]
async fn test_call_api_round_trip() {
    let gw = start_gateway(None, Duration::from_secs(5)).await;
    let mut ws = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some()).await;
    let caller = gw.bots.get(42).unwrap();

    let call = tokio::spawn(async move {
        caller
            .call_api(ApiRequest::new("get_status", json!({})))
            .await
    });

    let request = next_json(&mut ws).await;
    assert_eq!(request["action"], "get_status");
    assert_eq!(request["echo"], 1);

    // an unmatched echo is ignored
    send_json(&mut ws, json!({"status": "ok", "retcode": 0, "echo": 999})).await;
    send_json(
        &mut ws,
        json!({"status": "ok", "retcode": 0, "data": {"online": true}, "echo": request["echo"]}),
    )
    .await;

    let response = call.await.unwrap().unwrap();
    assert!(response.is_ok());
    assert_eq!(response.data["online"], true);
}

#[tokio::test]
async fn test_sequence_numbers_increase_per_connection() {
    let gw = start_gateway(None, Duration::from_millis(200)).await;
    let mut ws = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some()).await;
    let caller = gw.bots.get(42).unwrap();

    for expected in 1..=3u64 {
        let caller = Arc::clone(&caller);
        let call = tokio::spawn(async move { caller.call_api(ApiRequest::new("noop", json!({}))).await });
        let request = next_json(&mut ws).await;
        assert_eq!(request["echo"], expected);
        send_json(&mut ws, json!({"status": "ok", "retcode": 0, "echo": expected})).await;
        call.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_call_api_times_out() {
    let gw = start_gateway(None, Duration::from_millis(200)).await;
    let mut ws = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some()).await;
    let caller = gw.bots.get(42).unwrap();

    let call = tokio::spawn(async move { caller.call_api(ApiRequest::new("slow", json!({}))).await });
    let request = next_json(&mut ws).await;

    let result = call.await.unwrap();
    assert!(matches!(result, Err(CallError::Timeout(_))));

    // a late answer after the timeout is discarded without harm
    send_json(&mut ws, json!({"status": "ok", "retcode": 0, "echo": request["echo"]})).await;
}

#[tokio::test]
async fn test_disconnect_fails_pending_calls_with_closed() {
    let gw = start_gateway(None, Duration::from_secs(30)).await;
    let mut ws = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some()).await;
    let caller = gw.bots.get(42).unwrap();

    let pending = Arc::clone(&caller);
    let call = tokio::spawn(async move { pending.call_api(ApiRequest::new("hang", json!({}))).await });
    next_json(&mut ws).await;
    ws.close(None).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("swept promptly")
        .unwrap();
    assert!(matches!(result, Err(CallError::Closed)));

    // the dead connection refuses new work
    let after = caller.call_api(ApiRequest::new("again", json!({}))).await;
    assert!(matches!(
        after,
        Err(CallError::Closed) | Err(CallError::Transport(_))
    ));
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_events_are_handed_off_and_heartbeats_dropped() {
    let mut gw = start_gateway(None, Duration::from_secs(5)).await;
    let mut ws = connect(gw.addr, 42).await;
    wait_until(|| gw.bots.get(42).is_some()).await;

    send_json(
        &mut ws,
        json!({"post_type": "meta_event", "meta_event_type": "heartbeat", "interval": 5000}),
    )
    .await;
    send_json(
        &mut ws,
        json!({"post_type": "message", "message_type": "private", "user_id": 7, "message": "hi"}),
    )
    .await;

    let (payload, self_id) = tokio::time::timeout(Duration::from_secs(5), gw.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(self_id, 42);
    assert_eq!(payload["post_type"], "message");
    assert!(gw.events.try_recv().is_err());
}
