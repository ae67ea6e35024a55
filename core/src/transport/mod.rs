/// Realtime transport capability
///
/// The connection manager only sees `Transport` and `Channel`; the
/// Socket.IO implementation lives in `socketio`, and tests plug in their
/// own in-memory version.
pub mod packet;
mod polling;
pub mod socketio;

use crate::error::Result;
use crate::session::AuthPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

pub use packet::{EnginePacket, Handshake, SocketPacket};
pub use socketio::{SocketIoChannel, SocketIoTransport};

/// Fired once the server accepts the handshake
pub const EVENT_CONNECT: &str = "connect";
/// Fired when a connection attempt fails or is refused
pub const EVENT_CONNECT_ERROR: &str = "connect_error";
/// Fired when an established connection goes away; payload is the reason
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Underlying transport of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    Polling,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// An authenticated, bidirectional event connection
pub trait Channel: Send {
    /// Register a handler for `event`
    fn on(&mut self, event: &str, handler: EventHandler);

    /// Start connecting; handlers registered before this see every event
    fn open(&mut self);

    /// Detach all handlers and tear the connection down
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Factory for channels
pub trait Transport: Send + Sync {
    fn connect(
        &self,
        url: &str,
        auth: AuthPayload,
        transports: &[TransportKind],
    ) -> Result<Box<dyn Channel>>;
}

/// Event name to handlers map shared between a channel and its I/O task
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: &str, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.entry(event.to_string()).or_default().push(handler);
        }
    }

    /// Call every handler for `event`; returns how many ran
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        // Clone out so handlers run without the lock held
        let targets: Vec<EventHandler> = match self.handlers.read() {
            Ok(handlers) => handlers.get(event).cloned().unwrap_or_default(),
            Err(_) => return 0,
        };
        for handler in &targets {
            handler(payload.clone());
        }
        targets.len()
    }

    pub fn clear(&self) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .map(|h| h.values().all(|v| v.is_empty()))
            .unwrap_or(true)
    }
}
