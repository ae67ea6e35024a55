/// HireWire realtime client
///
/// Live conversation updates for the recruitment platform: an authenticated
/// Socket.IO channel per session, a session-local conversation cache with
/// unread badge, and toast notifications that stay quiet for the
/// conversation the user is already looking at.

pub mod api;
pub mod cli_app;
pub mod config;
pub mod conversation_store;
pub mod error;
pub mod http;
pub mod messenger_types;
pub mod notify;
pub mod realtime;
pub mod session;
pub mod transport;

pub use config::Config;
pub use conversation_store::{ConversationStore, OrderingPolicy};
pub use error::{ClientError, Result};
pub use realtime::{ConnectionManager, ConnectionStatus, MountedSession};
