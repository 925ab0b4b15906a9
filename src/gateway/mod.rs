// ABOUTME: Reverse-WebSocket listener that OneBot implementations connect into
// ABOUTME: Handshakes each connection, registers it as a bot and runs its read loop

pub mod auth;
pub mod caller;
pub mod correlator;
pub mod registry;

pub use caller::{ApiCaller, CallError, Caller, FrameWriter};
pub use correlator::Correlator;
pub use registry::BotRegistry;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use burrow_onebot::{Frame, Handshake};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// How long a fresh connection may take to send its handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives every inbound event frame together with the connection it came from.
pub trait EventSink: Send + Sync {
    fn submit(&self, payload: Value, caller: Arc<dyn ApiCaller>);
}

/// Called with the account id after each successful handshake.
pub type ConnectHook = Arc<dyn Fn(i64) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub listen_addr: String,
    pub access_token: Option<String>,
    pub api_timeout: Duration,
    pub retry_delay: Duration,
}

struct Shared {
    settings: GatewaySettings,
    bots: Arc<BotRegistry>,
    events: Arc<dyn EventSink>,
    on_connect: ConnectHook,
}

#[derive(Clone)]
pub struct GatewayServer {
    shared: Arc<Shared>,
    metrics: Option<Arc<PrometheusHandle>>,
}

impl GatewayServer {
    pub fn new(
        settings: GatewaySettings,
        bots: Arc<BotRegistry>,
        events: Arc<dyn EventSink>,
        on_connect: ConnectHook,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                bots,
                events,
                on_connect,
            }),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(Arc::new(handle));
        self
    }

    pub fn bots(&self) -> &Arc<BotRegistry> {
        &self.shared.bots
    }

    /// Every path upgrades to the bot WebSocket, except /metrics when enabled.
    pub fn router(&self) -> Router {
        let mut app = Router::new();
        if let Some(handle) = &self.metrics {
            app = app.merge(
                Router::new()
                    .route("/metrics", get(metrics_handler))
                    .with_state(Arc::clone(handle)),
            );
        }
        app.merge(
            Router::new()
                .fallback(ws_entry)
                .with_state(Arc::clone(&self.shared)),
        )
        .layer(TraceLayer::new_for_http())
    }

    /// Serves on an already bound listener until it fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }

    /// Binds and serves forever, retrying after a fixed delay whenever binding
    /// or serving fails.
    pub async fn run(&self) {
        let settings = &self.shared.settings;
        loop {
            match TcpListener::bind(&settings.listen_addr).await {
                Ok(listener) => {
                    tracing::info!(addr = %settings.listen_addr, "Gateway listening");
                    match self.serve(listener).await {
                        Ok(()) => tracing::warn!("Gateway listener stopped"),
                        Err(e) => tracing::warn!(error = %e, "Gateway listener failed"),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        addr = %settings.listen_addr,
                        error = %e,
                        retry_ms = settings.retry_delay.as_millis() as u64,
                        "Failed to bind gateway listener"
                    );
                }
            }
            tokio::time::sleep(settings.retry_delay).await;
        }
    }
}

async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

async fn ws_entry(
    State(shared): State<Arc<Shared>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(status) =
        auth::check_access(shared.settings.access_token.as_deref(), &headers, &query)
    {
        tracing::warn!(remote = %remote, status = status.as_u16(), "Rejected gateway connection");
        return status.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, shared, remote))
}

async fn handle_socket(socket: WebSocket, shared: Arc<Shared>, remote: SocketAddr) {
    let (sink, mut stream) = socket.split();

    let self_id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut stream)).await
    {
        Ok(Some(id)) => id,
        Ok(None) => return,
        Err(_) => {
            tracing::warn!(remote = %remote, "Gateway handshake timed out");
            return;
        }
    };

    let caller = Arc::new(Caller::new(
        self_id,
        Box::new(sink),
        shared.settings.api_timeout,
    ));
    let handle: Arc<dyn ApiCaller> = caller.clone();
    if shared.bots.register(Arc::clone(&handle)).is_some() {
        tracing::info!(self_id, "Replacing existing connection for bot");
    }
    tracing::info!(self_id, remote = %remote, "Bot connected");
    (shared.on_connect)(self_id);

    read_loop(&mut stream, &caller, &handle, shared.events.as_ref()).await;

    shared.bots.deregister(&handle);
    let swept = caller.correlator().close_all();
    caller.close().await;
    tracing::info!(self_id, pending_swept = swept, "Bot disconnected");
}

/// First text frame must be `{"self_id": ...}`. Pings are skipped.
async fn read_handshake(stream: &mut SplitStream<WebSocket>) -> Option<i64> {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                return match Handshake::parse(text.as_str()) {
                    Ok(handshake) => Some(handshake.self_id),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping connection with bad handshake");
                        None
                    }
                };
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(other) => {
                tracing::warn!(frame = ?other, "Dropping connection: handshake must be a text frame");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connection failed before handshake");
                return None;
            }
        }
    }
    None
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    caller: &Caller,
    handle: &Arc<dyn ApiCaller>,
    events: &dyn EventSink,
) {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(self_id = caller.self_id(), error = %e, "Gateway read failed");
                break;
            }
        };
        match Frame::parse(text.as_str()) {
            Ok(Frame::Response(response)) => {
                caller.correlator().resolve(response);
            }
            Ok(Frame::Heartbeat) => {
                tracing::trace!(self_id = caller.self_id(), "heartbeat");
            }
            Ok(Frame::Event(payload)) => events.submit(payload, Arc::clone(handle)),
            Err(e) => {
                tracing::warn!(self_id = caller.self_id(), error = %e, "Undecodable frame");
            }
        }
    }
}
