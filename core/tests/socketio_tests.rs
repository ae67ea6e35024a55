/// Socket.IO transport against loopback servers
extern crate hirewire_core;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hirewire_core::conversation_store::OrderingPolicy;
use hirewire_core::messenger_types::{ConversationListItem, Participant, ParticipantRole};
use hirewire_core::notify::{ChannelToaster, MemoryNavigator, NotificationDispatcher};
use hirewire_core::session::{AuthPayload, AuthToken, StaticToken};
use hirewire_core::transport::{
    Channel, SocketIoTransport, Transport, TransportKind, EVENT_CONNECT, EVENT_CONNECT_ERROR,
    EVENT_DISCONNECT,
};
use hirewire_core::{Config, ConnectionManager, ConnectionStatus, ConversationStore};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const OPEN: &str =
    r#"0{"sid":"e1","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
const CONNECT_ACK: &str = r#"40{"sid":"s1"}"#;
const WAIT: Duration = Duration::from_secs(5);
/// What `next_text` reports for a WebSocket close frame
const CLOSE_FRAME: &str = "<close>";

fn update_packet(unread: u32) -> String {
    let event = json!([
        "conversation-updated",
        {
            "conversation_id": "c1",
            "last_message": {
                "content": "Are you free for a call tomorrow?",
                "timestamp": "2026-05-04T12:30:00Z",
                "sender_id": "u1",
            },
            "unread_count": unread,
            "updated_at": "2026-05-04T12:30:00Z",
        }
    ]);
    format!("42{}", event)
}

fn test_config(addr: SocketAddr, transports: Vec<TransportKind>) -> Config {
    let mut config = Config::default();
    config.socket_url = format!("http://{}", addr);
    config.transports = transports;
    config.connection_timeout = Duration::from_secs(2);
    config.reconnect.enabled = false;
    config
}

fn recorder(tx: &mpsc::UnboundedSender<(String, Value)>, name: &str) -> hirewire_core::transport::EventHandler {
    let tx = tx.clone();
    let name = name.to_string();
    Arc::new(move |payload| {
        let _ = tx.send((name.clone(), payload));
    })
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match timeout(WAIT, ws.next()).await.expect("client went quiet") {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(Message::Close(_))) => return CLOSE_FRAME.to_string(),
            None => return String::new(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("websocket error: {}", e),
        }
    }
}

/// Accept one WebSocket client and run `script` against it
async fn ws_server<F, Fut>(script: F) -> SocketAddr
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });
    addr
}

#[tokio::test]
async fn test_websocket_handshake_events_and_close() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
    let addr = ws_server(move |mut ws| async move {
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        seen_tx.send(next_text(&mut ws).await).unwrap();
        ws.send(Message::Text(CONNECT_ACK.to_string())).await.unwrap();
        ws.send(Message::Text("2".to_string())).await.unwrap();
        seen_tx.send(next_text(&mut ws).await).unwrap();
        ws.send(Message::Text(update_packet(2))).await.unwrap();
        // Client closes: namespace disconnect, then a close frame
        seen_tx.send(next_text(&mut ws).await).unwrap();
        seen_tx.send(next_text(&mut ws).await).unwrap();
    })
    .await;

    let config = test_config(addr, vec![TransportKind::WebSocket]);
    let transport = SocketIoTransport::from_config(&config);
    let mut channel = transport
        .connect(
            &config.socket_url,
            AuthPayload {
                token: "abc".to_string(),
            },
            &config.transports,
        )
        .unwrap();

    let (tx, mut events) = mpsc::unbounded_channel();
    channel.on(EVENT_CONNECT, recorder(&tx, EVENT_CONNECT));
    channel.on("conversation-updated", recorder(&tx, "conversation-updated"));
    channel.open();

    assert_eq!(
        timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap(),
        r#"40{"token":"abc"}"#
    );

    let (name, payload) = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(name, EVENT_CONNECT);
    assert_eq!(payload, json!({"sid": "s1"}));

    assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap(), "3");

    let (name, payload) = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(name, "conversation-updated");
    assert_eq!(payload["unread_count"], 2);

    channel.close();
    assert!(channel.is_closed());
    assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap(), "41");
    assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap(), CLOSE_FRAME);
}

#[tokio::test]
async fn test_refused_handshake_reports_connect_error() {
    let addr = ws_server(|mut ws| async move {
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        let _ = next_text(&mut ws).await;
        ws.send(Message::Text(r#"44{"message":"unauthorized"}"#.to_string()))
            .await
            .unwrap();
        let _ = next_text(&mut ws).await;
    })
    .await;

    let config = test_config(addr, vec![TransportKind::WebSocket]);
    let mut channel = SocketIoTransport::from_config(&config)
        .connect(
            &config.socket_url,
            AuthPayload {
                token: "expired".to_string(),
            },
            &config.transports,
        )
        .unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    channel.on(EVENT_CONNECT, recorder(&tx, EVENT_CONNECT));
    channel.on(EVENT_CONNECT_ERROR, recorder(&tx, EVENT_CONNECT_ERROR));
    channel.open();

    let (name, payload) = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(name, EVENT_CONNECT_ERROR);
    assert_eq!(payload, json!({"message": "unauthorized"}));
    channel.close();
}

#[tokio::test]
async fn test_manager_over_websocket() {
    let addr = ws_server(|mut ws| async move {
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        let _ = next_text(&mut ws).await;
        ws.send(Message::Text(CONNECT_ACK.to_string())).await.unwrap();
        ws.send(Message::Text(update_packet(6))).await.unwrap();
        let _ = next_text(&mut ws).await;
    })
    .await;

    let config = test_config(addr, vec![TransportKind::WebSocket]);
    let store = ConversationStore::new(OrderingPolicy::RecentFirst);
    store
        .hydrate(vec![ConversationListItem {
            conversation_id: "c1".to_string(),
            other_participant: Participant {
                id: "u1".to_string(),
                name: "Priya".to_string(),
                avatar: None,
                role: ParticipantRole::Recruiter,
            },
            last_message: None,
            unread_count: 0,
            updated_at: "2026-05-04T09:00:00Z".parse().unwrap(),
        }])
        .await;
    let navigator = Arc::new(MemoryNavigator::new("/jobs"));
    let (toaster, mut toasts) = ChannelToaster::new();
    let manager = ConnectionManager::new(
        &config,
        Arc::new(SocketIoTransport::from_config(&config)),
        Arc::new(StaticToken(AuthToken::new("abc"))),
        store.clone(),
        Arc::new(NotificationDispatcher::new(navigator, Arc::new(toaster))),
    );

    let session = manager.mount().unwrap();
    let toast = timeout(WAIT, toasts.recv()).await.unwrap().unwrap();
    assert_eq!(toast.title, "Priya");
    assert_eq!(toast.preview, "Are you free for a call tomorrow?");
    assert_eq!(session.status(), ConnectionStatus::Connected);
    assert_eq!(store.badge().await.as_deref(), Some("6"));

    session.unmount().await;
}

#[derive(Default)]
struct PollingServer {
    outbox: VecDeque<String>,
    posted: Vec<String>,
    websocket_attempts: usize,
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=UTF-8")
        .body(Full::new(body.into()))
        .unwrap()
}

async fn polling_handler(
    req: Request<Incoming>,
    state: Arc<Mutex<PollingServer>>,
) -> Response<Full<Bytes>> {
    let query = req.uri().query().unwrap_or_default().to_string();
    if query.contains("transport=websocket") {
        state.lock().await.websocket_attempts += 1;
        return text_response(StatusCode::BAD_REQUEST, "Transport unknown");
    }
    if !query.contains("sid=") {
        return text_response(StatusCode::OK, OPEN);
    }

    if req.method() == Method::POST {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        let mut state = state.lock().await;
        if body.starts_with("40") {
            state.outbox.push_back(CONNECT_ACK.to_string());
            state.outbox.push_back(update_packet(3));
        }
        state.posted.push(body);
        return text_response(StatusCode::OK, "ok");
    }

    for _ in 0..20 {
        {
            let mut state = state.lock().await;
            if !state.outbox.is_empty() {
                let payload: Vec<String> = state.outbox.drain(..).collect();
                return text_response(StatusCode::OK, payload.join("\u{1e}"));
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    text_response(StatusCode::OK, "6")
}

async fn polling_server(state: Arc<Mutex<PollingServer>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let state = state.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(polling_handler(req, state).await) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_falls_back_to_polling() {
    let state = Arc::new(Mutex::new(PollingServer::default()));
    let addr = polling_server(state.clone()).await;

    let config = test_config(addr, vec![TransportKind::WebSocket, TransportKind::Polling]);
    let mut channel = SocketIoTransport::from_config(&config)
        .connect(
            &config.socket_url,
            AuthPayload {
                token: "abc".to_string(),
            },
            &config.transports,
        )
        .unwrap();
    let (tx, mut events) = mpsc::unbounded_channel();
    channel.on(EVENT_CONNECT, recorder(&tx, EVENT_CONNECT));
    channel.on("conversation-updated", recorder(&tx, "conversation-updated"));
    channel.open();

    let (name, _) = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(name, EVENT_CONNECT);
    let (name, payload) = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(name, "conversation-updated");
    assert_eq!(payload["conversation_id"], "c1");

    {
        let state = state.lock().await;
        assert_eq!(state.websocket_attempts, 1);
        assert_eq!(state.posted[0], r#"40{"token":"abc"}"#);
    }
    channel.close();
}

/// Accept WebSocket clients until the test ends; `script` gets the
/// zero-based connection number
async fn ws_server_each<F, Fut>(script: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(usize, WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let script = Arc::new(script);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let script = script.clone();
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    script(n, ws).await;
                }
            });
        }
    });
    (addr, accepted)
}

fn reconnecting(mut config: Config, max_attempts: Option<u32>, delay: Duration) -> Config {
    config.reconnect.enabled = true;
    config.reconnect.max_attempts = max_attempts;
    config.reconnect.delay = delay;
    config.reconnect.max_delay = delay * 2;
    config.reconnect.randomization_factor = 0.0;
    config
}

/// Channel with recorders on the lifecycle events, already opened
fn open_recorded(config: &Config) -> (Box<dyn Channel>, mpsc::UnboundedReceiver<(String, Value)>) {
    let mut channel = SocketIoTransport::from_config(config)
        .connect(
            &config.socket_url,
            AuthPayload {
                token: "abc".to_string(),
            },
            &config.transports,
        )
        .unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    for event in [EVENT_CONNECT, EVENT_CONNECT_ERROR, EVENT_DISCONNECT] {
        channel.on(event, recorder(&tx, event));
    }
    channel.open();
    (channel, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
    timeout(WAIT, rx.recv())
        .await
        .expect("no event in time")
        .expect("recorder dropped")
}

#[tokio::test]
async fn test_reconnects_after_server_drops() {
    let (addr, accepted) = ws_server_each(|n, mut ws| async move {
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        let _ = next_text(&mut ws).await;
        ws.send(Message::Text(CONNECT_ACK.to_string())).await.unwrap();
        if n >= 2 {
            // Third connection stays up until the client leaves
            let _ = next_text(&mut ws).await;
        }
    })
    .await;

    // One attempt allowed, but every successful connection resets the count
    let config = reconnecting(
        test_config(addr, vec![TransportKind::WebSocket]),
        Some(1),
        Duration::from_millis(30),
    );
    let (mut channel, mut events) = open_recorded(&config);

    let mut names = Vec::new();
    for _ in 0..5 {
        names.push(next_event(&mut events).await.0);
    }
    assert_eq!(
        names,
        vec![
            EVENT_CONNECT,
            EVENT_DISCONNECT,
            EVENT_CONNECT,
            EVENT_DISCONNECT,
            EVENT_CONNECT
        ]
    );
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
    channel.close();
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    // Accepts TCP and hangs up before the WebSocket handshake
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let config = reconnecting(
        test_config(addr, vec![TransportKind::WebSocket]),
        Some(2),
        Duration::from_millis(20),
    );
    let (mut channel, mut events) = open_recorded(&config);

    // The first try plus two reconnection attempts
    for _ in 0..3 {
        let (name, payload) = next_event(&mut events).await;
        assert_eq!(name, EVENT_CONNECT_ERROR);
        assert!(payload["message"].is_string());
    }
    sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
    channel.close();
}

#[tokio::test]
async fn test_silent_server_hits_ping_timeout() {
    let addr = ws_server(|mut ws| async move {
        ws.send(Message::Text(
            r#"0{"sid":"e2","upgrades":[],"pingInterval":100,"pingTimeout":100}"#.to_string(),
        ))
        .await
        .unwrap();
        let _ = next_text(&mut ws).await;
        ws.send(Message::Text(CONNECT_ACK.to_string())).await.unwrap();
        // Never pings again
        sleep(Duration::from_secs(3)).await;
    })
    .await;

    let config = test_config(addr, vec![TransportKind::WebSocket]);
    let (mut channel, mut events) = open_recorded(&config);

    assert_eq!(next_event(&mut events).await.0, EVENT_CONNECT);
    let (name, reason) = timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("liveness timeout did not fire")
        .unwrap();
    assert_eq!(name, EVENT_DISCONNECT);
    assert_eq!(reason, json!("ping timeout"));
    channel.close();
}

#[tokio::test]
async fn test_close_during_backoff_stops_reconnecting() {
    let (addr, accepted) = ws_server_each(|_, mut ws| async move {
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        let _ = next_text(&mut ws).await;
        ws.send(Message::Text(CONNECT_ACK.to_string())).await.unwrap();
    })
    .await;

    let config = reconnecting(
        test_config(addr, vec![TransportKind::WebSocket]),
        None,
        Duration::from_millis(300),
    );
    let (mut channel, mut events) = open_recorded(&config);

    assert_eq!(next_event(&mut events).await.0, EVENT_CONNECT);
    assert_eq!(next_event(&mut events).await.0, EVENT_DISCONNECT);
    channel.close();

    sleep(Duration::from_millis(700)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert!(events.try_recv().is_err());
}
