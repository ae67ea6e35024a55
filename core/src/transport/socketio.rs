/// Socket.IO client transport
///
/// Speaks Engine.IO v4 over WebSocket, falling back to HTTP long-polling
/// when the preferred transport cannot be established. Reconnection with
/// jittered exponential backoff happens here, below the connection manager.
use super::packet::{EnginePacket, Handshake, SocketPacket, DEFAULT_NAMESPACE, ENGINE_PROTOCOL};
use super::polling::PollingConn;
use super::{
    Channel, EventHandler, HandlerRegistry, Transport, TransportKind, EVENT_CONNECT,
    EVENT_CONNECT_ERROR, EVENT_DISCONNECT,
};
use crate::config::{Config, ReconnectConfig};
use crate::error::{ClientError, Result};
use crate::http::HttpClient;
use crate::session::AuthPayload;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport tuning taken from `Config`
#[derive(Debug, Clone)]
pub struct SocketIoOptions {
    pub path: String,
    pub connection_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl From<&Config> for SocketIoOptions {
    fn from(config: &Config) -> Self {
        Self {
            path: config.socket_path.clone(),
            connection_timeout: config.connection_timeout,
            reconnect: config.reconnect.clone(),
        }
    }
}

pub struct SocketIoTransport {
    options: SocketIoOptions,
}

impl SocketIoTransport {
    pub fn new(options: SocketIoOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(SocketIoOptions::from(config))
    }
}

impl Transport for SocketIoTransport {
    fn connect(
        &self,
        url: &str,
        auth: AuthPayload,
        transports: &[TransportKind],
    ) -> Result<Box<dyn Channel>> {
        if transports.is_empty() {
            return Err(ClientError::Config("No transports to try".to_string()));
        }
        // Fail fast on an unusable URL instead of inside the I/O task
        engine_url(url, &self.options.path, transports[0])?;

        let auth = serde_json::to_value(&auth)?;
        Ok(Box::new(SocketIoChannel {
            session: Some(Session {
                url: url.to_string(),
                auth,
                transports: transports.to_vec(),
                options: self.options.clone(),
                handlers: HandlerRegistry::new(),
            }),
            handlers: HandlerRegistry::new(),
            shutdown: None,
            task: None,
            closed: false,
        }))
    }
}

/// Channel backed by a background Socket.IO session
pub struct SocketIoChannel {
    session: Option<Session>,
    handlers: HandlerRegistry,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl Channel for SocketIoChannel {
    fn on(&mut self, event: &str, handler: EventHandler) {
        if !self.closed {
            self.handlers.add(event, handler);
        }
    }

    fn open(&mut self) {
        if self.closed {
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.handlers = self.handlers.clone();
        let (tx, rx) = oneshot::channel();
        self.shutdown = Some(tx);
        self.task = Some(tokio::spawn(session.run(rx)));
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.handlers.clear();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        // The task sends its goodbye packets and exits on its own
        self.task.take();
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Engine.IO endpoint for `kind` under `base`
pub fn engine_url(base: &str, path: &str, kind: TransportKind) -> Result<String> {
    let base = base.trim_end_matches('/');
    let base = match kind {
        TransportKind::WebSocket => {
            if let Some(rest) = base.strip_prefix("https://") {
                format!("wss://{}", rest)
            } else if let Some(rest) = base.strip_prefix("http://") {
                format!("ws://{}", rest)
            } else {
                return Err(ClientError::Config(format!("Unsupported socket URL: {}", base)));
            }
        }
        TransportKind::Polling => {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(ClientError::Config(format!("Unsupported socket URL: {}", base)));
            }
            base.to_string()
        }
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    Ok(format!(
        "{}{}?EIO={}&transport={}",
        base, path, ENGINE_PROTOCOL, kind
    ))
}

/// Delay before reconnection attempt `attempt` (zero-based)
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32, rng: &mut impl Rng) -> Duration {
    let base = config.delay.as_millis() as f64 * 2f64.powi(attempt.min(31) as i32);
    let jitter = config.randomization_factor;
    let ms = if jitter > 0.0 {
        let r: f64 = rng.gen();
        let deviation = (r * jitter * base).floor();
        if ((r * 10.0).floor() as u64) & 1 == 0 {
            base - deviation
        } else {
            base + deviation
        }
    } else {
        base
    };
    Duration::from_millis(ms.min(config.max_delay.as_millis() as f64).max(0.0) as u64)
}

enum EngineConn {
    WebSocket(Box<WsStream>),
    Polling(PollingConn),
}

impl EngineConn {
    async fn recv(&mut self) -> Result<Option<EnginePacket>> {
        match self {
            EngineConn::WebSocket(ws) => loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => match EnginePacket::decode(&text) {
                        Ok(packet) => return Ok(Some(packet)),
                        Err(e) => warn!("Dropping malformed engine packet: {}", e),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(ClientError::Connection(e.to_string())),
                }
            },
            EngineConn::Polling(conn) => conn.recv().await,
        }
    }

    async fn send(&mut self, packet: EnginePacket) -> Result<()> {
        match self {
            EngineConn::WebSocket(ws) => ws
                .send(WsMessage::Text(packet.encode()?))
                .await
                .map_err(|e| ClientError::Connection(e.to_string())),
            EngineConn::Polling(conn) => conn.send(packet).await,
        }
    }

    async fn send_socket(&mut self, packet: &SocketPacket) -> Result<()> {
        self.send(EnginePacket::Message(packet.encode()?)).await
    }

    async fn close(&mut self) {
        match self {
            EngineConn::WebSocket(ws) => {
                if let Err(e) = WebSocketStream::close(&mut **ws, None).await {
                    debug!("WebSocket close failed: {}", e);
                }
            }
            EngineConn::Polling(conn) => conn.close().await,
        }
    }
}

enum SessionEnd {
    /// `close()` was called
    ClientClosed,
    /// Server sent a namespace disconnect
    ServerClosed,
    /// Server refused the handshake
    Rejected,
    /// Transport went away
    Lost { was_connected: bool },
}

enum Step {
    Shutdown,
    Received(std::result::Result<Result<Option<EnginePacket>>, tokio::time::error::Elapsed>),
}

struct Session {
    url: String,
    auth: Value,
    transports: Vec<TransportKind>,
    options: SocketIoOptions,
    handlers: HandlerRegistry,
}

impl Session {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut rng = StdRng::from_entropy();
        let mut failures: u32 = 0;

        loop {
            let attempt = tokio::select! {
                _ = &mut shutdown => return,
                result = self.establish() => result,
            };

            match attempt {
                Ok((conn, handshake)) => {
                    match self.drive(conn, &handshake, &mut shutdown).await {
                        SessionEnd::ClientClosed | SessionEnd::ServerClosed | SessionEnd::Rejected => {
                            return
                        }
                        SessionEnd::Lost { was_connected } => {
                            if was_connected {
                                failures = 0;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Realtime connection to {} failed: {}", self.url, e);
                    self.handlers
                        .emit(EVENT_CONNECT_ERROR, json!({ "message": e.to_string() }));
                }
            }

            let reconnect = &self.options.reconnect;
            if !reconnect.enabled {
                return;
            }
            if let Some(max) = reconnect.max_attempts {
                if failures >= max {
                    warn!("Giving up after {} reconnection attempts", failures);
                    return;
                }
            }
            let delay = backoff_delay(reconnect, failures, &mut rng);
            failures += 1;
            info!("Reconnecting in {:?} (attempt {})", delay, failures);

            tokio::select! {
                _ = &mut shutdown => return,
                _ = sleep(delay) => {}
            }
        }
    }

    /// Try each transport in preference order
    async fn establish(&self) -> Result<(EngineConn, Handshake)> {
        let mut last_err = None;
        for kind in &self.transports {
            match timeout(self.options.connection_timeout, self.open_transport(*kind)).await {
                Ok(Ok(pair)) => {
                    debug!("Engine session {} over {}", pair.1.sid, kind);
                    return Ok(pair);
                }
                Ok(Err(e)) => {
                    debug!("{} transport failed: {}", kind, e);
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!("{} transport timed out", kind);
                    last_err = Some(ClientError::Timeout(format!("{} handshake timed out", kind)));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ClientError::Connection("No transports to try".to_string())))
    }

    async fn open_transport(&self, kind: TransportKind) -> Result<(EngineConn, Handshake)> {
        let url = engine_url(&self.url, &self.options.path, kind)?;
        match kind {
            TransportKind::WebSocket => {
                let (mut ws, _) = connect_async(url.as_str())
                    .await
                    .map_err(|e| ClientError::Connection(e.to_string()))?;
                let handshake = loop {
                    match ws.next().await {
                        Some(Ok(WsMessage::Text(text))) => match EnginePacket::decode(&text)? {
                            EnginePacket::Open(handshake) => break handshake,
                            other => {
                                return Err(ClientError::Protocol(format!(
                                    "Expected open packet, got {:?}",
                                    other
                                )))
                            }
                        },
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(ClientError::Connection(e.to_string())),
                        None => {
                            return Err(ClientError::Connection(
                                "Closed during handshake".to_string(),
                            ))
                        }
                    }
                };
                Ok((EngineConn::WebSocket(Box::new(ws)), handshake))
            }
            TransportKind::Polling => {
                let http = HttpClient::new(self.options.connection_timeout);
                let (conn, handshake) = PollingConn::open(http, &url).await?;
                Ok((EngineConn::Polling(conn), handshake))
            }
        }
    }

    async fn drive(
        &self,
        mut conn: EngineConn,
        handshake: &Handshake,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        let mut connected = false;

        if let Err(e) = conn.send_socket(&SocketPacket::connect(self.auth.clone())).await {
            return self.lost(connected, &format!("transport error: {}", e));
        }

        loop {
            let step = tokio::select! {
                _ = &mut *shutdown => Step::Shutdown,
                received = timeout(liveness, conn.recv()) => Step::Received(received),
            };

            let packet = match step {
                Step::Shutdown => {
                    if connected {
                        if let Err(e) = conn.send_socket(&SocketPacket::disconnect()).await {
                            debug!("Failed to send disconnect: {}", e);
                        }
                    }
                    conn.close().await;
                    info!("Realtime channel closed by client");
                    return SessionEnd::ClientClosed;
                }
                Step::Received(Err(_)) => return self.lost(connected, "ping timeout"),
                Step::Received(Ok(Err(e))) => {
                    return self.lost(connected, &format!("transport error: {}", e))
                }
                Step::Received(Ok(Ok(None))) => return self.lost(connected, "transport close"),
                Step::Received(Ok(Ok(Some(packet)))) => packet,
            };

            let text = match packet {
                EnginePacket::Ping(data) => {
                    if let Err(e) = conn.send(EnginePacket::Pong(data)).await {
                        return self.lost(connected, &format!("transport error: {}", e));
                    }
                    continue;
                }
                EnginePacket::Close => return self.lost(connected, "transport close"),
                EnginePacket::Message(text) => text,
                _ => continue,
            };

            let packet = match SocketPacket::decode(&text) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Dropping malformed socket packet: {}", e);
                    continue;
                }
            };
            if packet.namespace() != DEFAULT_NAMESPACE {
                debug!("Ignoring packet for namespace {}", packet.namespace());
                continue;
            }

            match packet {
                SocketPacket::Connect { data, .. } => {
                    connected = true;
                    info!("Realtime channel connected to {}", self.url);
                    self.handlers.emit(EVENT_CONNECT, data.unwrap_or(Value::Null));
                }
                SocketPacket::ConnectError { data, .. } => {
                    warn!("Realtime handshake refused: {:?}", data);
                    self.handlers
                        .emit(EVENT_CONNECT_ERROR, data.unwrap_or(Value::Null));
                    conn.close().await;
                    return SessionEnd::Rejected;
                }
                SocketPacket::Disconnect { .. } => {
                    info!("Realtime channel disconnected by server");
                    self.handlers
                        .emit(EVENT_DISCONNECT, json!("io server disconnect"));
                    conn.close().await;
                    return SessionEnd::ServerClosed;
                }
                SocketPacket::Event { name, args, .. } => {
                    let payload = args.into_iter().next().unwrap_or(Value::Null);
                    if self.handlers.emit(&name, payload) == 0 {
                        debug!("No handler for event {}", name);
                    }
                }
                SocketPacket::Ack { id, .. } => debug!("Ignoring ack {}", id),
            }
        }
    }

    fn lost(&self, connected: bool, reason: &str) -> SessionEnd {
        if connected {
            info!("Realtime channel disconnected: {}", reason);
            self.handlers.emit(EVENT_DISCONNECT, json!(reason));
        } else {
            warn!("Realtime channel failed before connecting: {}", reason);
            self.handlers
                .emit(EVENT_CONNECT_ERROR, json!({ "message": reason }));
        }
        SessionEnd::Lost {
            was_connected: connected,
        }
    }
}
