/// Toast notifications for conversation updates
use crate::messenger_types::{conversation_route, ConversationListItem, ConversationUpdatedEvent};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Longest preview shown before truncating
pub const PREVIEW_LIMIT: usize = 50;
pub const ELLIPSIS: &str = "...";
/// Title used when the sender's name is not known
pub const FALLBACK_TITLE: &str = "New message";

/// Client-side navigation
pub trait Navigator: Send + Sync {
    /// Current location, e.g. `/messages/c1?tab=files`
    fn location(&self) -> String;

    /// Push a new route
    fn push(&self, route: &str);
}

/// Displays transient notifications
pub trait Toaster: Send + Sync {
    fn show(&self, toast: Toast);
}

/// The single action a toast offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastAction {
    View { route: String },
}

impl ToastAction {
    pub fn label(&self) -> &'static str {
        match self {
            ToastAction::View { .. } => "View",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub conversation_id: String,
    pub title: String,
    pub preview: String,
    pub action: ToastAction,
}

impl Toast {
    /// Run the toast's action
    pub fn activate(&self, navigator: &dyn Navigator) {
        match &self.action {
            ToastAction::View { route } => navigator.push(route),
        }
    }
}

/// First `PREVIEW_LIMIT` characters plus an ellipsis, or the content as-is
pub fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_LIMIT {
        let cut: String = content.chars().take(PREVIEW_LIMIT).collect();
        format!("{}{}", cut, ELLIPSIS)
    } else {
        content.to_string()
    }
}

/// Whether `location` is the detail view of `conversation_id`
pub fn is_viewing(location: &str, conversation_id: &str) -> bool {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    let path = match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    };
    path == conversation_route(conversation_id)
}

/// Decides per event whether to toast, and shows the toast
pub struct NotificationDispatcher {
    navigator: Arc<dyn Navigator>,
    toaster: Arc<dyn Toaster>,
}

impl NotificationDispatcher {
    pub fn new(navigator: Arc<dyn Navigator>, toaster: Arc<dyn Toaster>) -> Self {
        Self { navigator, toaster }
    }

    /// Toast for `event`, or `None` when the user is already looking at it
    pub fn decide(
        &self,
        event: &ConversationUpdatedEvent,
        item: Option<&ConversationListItem>,
    ) -> Option<Toast> {
        let location = self.navigator.location();
        if is_viewing(&location, &event.conversation_id) {
            debug!(
                "Suppressing toast for {}: already viewing {}",
                event.conversation_id, location
            );
            return None;
        }

        let title = item
            .filter(|i| i.other_participant.id == event.last_message.sender_id)
            .map(|i| i.other_participant.name.clone())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        Some(Toast {
            conversation_id: event.conversation_id.clone(),
            title,
            preview: preview(&event.last_message.content),
            action: ToastAction::View {
                route: conversation_route(&event.conversation_id),
            },
        })
    }

    /// `decide`, then show the toast if there is one
    pub fn dispatch(
        &self,
        event: &ConversationUpdatedEvent,
        item: Option<&ConversationListItem>,
    ) -> Option<Toast> {
        let toast = self.decide(event, item)?;
        self.toaster.show(toast.clone());
        Some(toast)
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }
}

/// Navigator that just remembers where it is
#[derive(Debug, Default)]
pub struct MemoryNavigator {
    location: RwLock<String>,
    history: RwLock<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: RwLock::new(location.into()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Routes pushed so far
    pub fn history(&self) -> Vec<String> {
        self.history
            .read()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

impl Navigator for MemoryNavigator {
    fn location(&self) -> String {
        self.location
            .read()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    fn push(&self, route: &str) {
        if let Ok(mut location) = self.location.write() {
            *location = route.to_string();
        }
        if let Ok(mut history) = self.history.write() {
            history.push(route.to_string());
        }
    }
}

/// Forwards toasts to a front end over a channel
#[derive(Debug, Clone)]
pub struct ChannelToaster {
    tx: mpsc::UnboundedSender<Toast>,
}

impl ChannelToaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Toaster for ChannelToaster {
    fn show(&self, toast: Toast) {
        // Fire and forget; a closed front end just misses it
        let _ = self.tx.send(toast);
    }
}
