/// Realtime connection manager
///
/// Mounting opens at most one authenticated channel for the session and
/// starts a pump task that applies inbound events, one at a time and in
/// arrival order, to the conversation store and the notification
/// dispatcher. The returned `MountedSession` owns the channel; dropping or
/// unmounting it closes the channel and stops all further state writes.
use crate::config::Config;
use crate::conversation_store::{ApplyOutcome, ConversationStore};
use crate::error::{ClientError, Result};
use crate::messenger_types::ConversationUpdatedEvent;
use crate::notify::NotificationDispatcher;
use crate::session::{AuthPayload, SessionGuard, SharedTokenProvider};
use crate::transport::{
    Channel, EventHandler, Transport, TransportKind, EVENT_CONNECT, EVENT_CONNECT_ERROR,
    EVENT_DISCONNECT,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Observable state of a session's channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No channel (no token, or not mounted yet)
    Idle,
    Connecting,
    Connected,
    /// Lost or refused; the transport may still be retrying
    Disconnected { reason: String },
    /// Unmounted
    Closed,
}

/// What the transport handlers hand to the pump
#[derive(Debug)]
enum Inbound {
    Connected,
    ConnectError(Value),
    Disconnected(Value),
    ConversationUpdated(Value),
}

/// Opens realtime sessions, at most one live channel at a time
pub struct ConnectionManager {
    socket_url: String,
    transports: Vec<TransportKind>,
    transport: Arc<dyn Transport>,
    tokens: SharedTokenProvider,
    store: ConversationStore,
    dispatcher: Arc<NotificationDispatcher>,
    /// Guard of the session that currently owns a channel
    live: Mutex<Option<SessionGuard>>,
}

impl ConnectionManager {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        tokens: SharedTokenProvider,
        store: ConversationStore,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            socket_url: config.socket_url.clone(),
            transports: config.transports.clone(),
            transport,
            tokens,
            store,
            dispatcher,
            live: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Mount a session; without a token this is a logged no-op
    ///
    /// Fails with `ClientError::Connection` while an earlier session still
    /// owns a channel. Unmount that one first.
    pub fn mount(&self) -> Result<MountedSession> {
        let id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);
        let status_tx = Arc::new(status_tx);
        let guard = SessionGuard::new();

        let mut session = MountedSession {
            id,
            channel: None,
            guard: guard.clone(),
            pump: None,
            status_tx: status_tx.clone(),
            status_rx,
        };

        let Some(token) = self.tokens.token() else {
            info!(session = %id, "No access token; realtime updates disabled");
            return Ok(session);
        };

        let mut live = self
            .live
            .lock()
            .map_err(|_| ClientError::Connection("Session registry poisoned".to_string()))?;
        if live.as_ref().is_some_and(SessionGuard::is_live) {
            warn!(session = %id, "Realtime session already mounted; refusing a second channel");
            return Err(ClientError::Connection(
                "A realtime session is already mounted".to_string(),
            ));
        }

        let mut channel = self.transport.connect(
            &self.socket_url,
            AuthPayload::from(&token),
            &self.transports,
        )?;

        let (tx, rx) = mpsc::unbounded_channel();
        channel.on(EVENT_CONNECT, forward(&tx, &guard, |_| Inbound::Connected));
        channel.on(EVENT_CONNECT_ERROR, forward(&tx, &guard, Inbound::ConnectError));
        channel.on(EVENT_DISCONNECT, forward(&tx, &guard, Inbound::Disconnected));
        channel.on(
            ConversationUpdatedEvent::NAME,
            forward(&tx, &guard, Inbound::ConversationUpdated),
        );

        // From here on the session owns the channel, so every exit closes it
        session.channel = Some(channel);
        *live = Some(guard.clone());
        drop(live);

        let pump = Pump {
            guard,
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            status: status_tx.clone(),
        };
        let span = tracing::info_span!("realtime", session = %id);
        session.pump = Some(tokio::spawn(pump.run(rx).instrument(span)));

        status_tx.send_replace(ConnectionStatus::Connecting);
        if let Some(channel) = session.channel.as_mut() {
            channel.open();
        }
        info!(session = %id, url = %self.socket_url, "Realtime session mounted");
        Ok(session)
    }
}

fn forward(
    tx: &mpsc::UnboundedSender<Inbound>,
    guard: &SessionGuard,
    wrap: fn(Value) -> Inbound,
) -> EventHandler {
    let tx = tx.clone();
    let guard = guard.clone();
    Arc::new(move |payload| {
        if guard.is_live() {
            // Receiver gone means the session is being torn down
            let _ = tx.send(wrap(payload));
        }
    })
}

/// A mounted session; owns the channel until unmounted or dropped
pub struct MountedSession {
    id: Uuid,
    channel: Option<Box<dyn Channel>>,
    guard: SessionGuard,
    pump: Option<JoinHandle<()>>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl MountedSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a channel was opened and the session is still live
    pub fn is_active(&self) -> bool {
        self.channel.is_some() && self.guard.is_live()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Close the channel and stop applying events
    ///
    /// Returns once the pump has stopped, so no store write or toast from
    /// this session happens afterwards.
    pub async fn unmount(mut self) {
        if let Some(pump) = self.teardown() {
            // Cancelled is the expected outcome
            let _ = pump.await;
        }
    }

    fn teardown(&mut self) -> Option<JoinHandle<()>> {
        if !self.guard.revoke() {
            return None;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        let pump = self.pump.take();
        if let Some(pump) = &pump {
            pump.abort();
        }
        self.status_tx.send_replace(ConnectionStatus::Closed);
        info!(session = %self.id, "Realtime session unmounted");
        pump
    }
}

impl Drop for MountedSession {
    fn drop(&mut self) {
        // The pump may still be finishing an event here; the guard
        // discards anything it has not written yet
        self.teardown();
    }
}

struct Pump {
    guard: SessionGuard,
    store: ConversationStore,
    dispatcher: Arc<NotificationDispatcher>,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl Pump {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Inbound>) {
        while let Some(inbound) = rx.recv().await {
            if !self.guard.is_live() {
                break;
            }
            match inbound {
                Inbound::Connected => {
                    info!("Realtime channel connected");
                    self.set_status(ConnectionStatus::Connected);
                }
                Inbound::ConnectError(payload) => {
                    let reason = reason_of(&payload);
                    warn!("Realtime connection error: {}", reason);
                    self.set_status(ConnectionStatus::Disconnected { reason });
                }
                Inbound::Disconnected(payload) => {
                    let reason = reason_of(&payload);
                    info!("Realtime channel disconnected: {}", reason);
                    self.set_status(ConnectionStatus::Disconnected { reason });
                }
                Inbound::ConversationUpdated(payload) => self.conversation_updated(payload).await,
            }
        }
        debug!("Realtime pump stopped");
    }

    async fn conversation_updated(&self, payload: Value) {
        let event = match ConversationUpdatedEvent::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed {} event: {}", ConversationUpdatedEvent::NAME, e);
                return;
            }
        };

        match self.store.apply_guarded(&event, &self.guard).await {
            ApplyOutcome::Discarded => return,
            ApplyOutcome::Unknown => debug!(
                "Update for conversation {} that is not loaded yet",
                event.conversation_id
            ),
            ApplyOutcome::Applied => debug!(
                "Conversation {} now has {} unread",
                event.conversation_id, event.unread_count
            ),
        }

        let item = self.store.get(&event.conversation_id).await;
        if self.guard.is_live() {
            self.dispatcher.dispatch(&event, item.as_ref());
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        if self.guard.is_live() {
            self.status.send_replace(status);
        }
    }
}

fn reason_of(payload: &Value) -> String {
    match payload {
        Value::String(reason) => reason.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}
