/// Session-local conversation cache
///
/// Holds the conversation list hydrated by the initial load and merges
/// `conversation-updated` events into it. Consumers only ever see cloned
/// snapshots.
use crate::error::{ClientError, Result};
use crate::messenger_types::{ConversationListItem, ConversationUpdatedEvent};
use crate::session::SessionGuard;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

/// Badge text once the unread total passes this value
const BADGE_CAP: u64 = 99;

/// Display order of the conversation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingPolicy {
    /// Newest `updated_at` first, re-sorted after every merge
    #[default]
    RecentFirst,
    /// Keep the order the initial load returned
    Insertion,
}

impl FromStr for OrderingPolicy {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recent-first" | "recent" => Ok(Self::RecentFirst),
            "insertion" => Ok(Self::Insertion),
            other => Err(ClientError::Config(format!(
                "Unknown ordering '{}' (expected recent-first or insertion)",
                other
            ))),
        }
    }
}

/// Result of merging one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Matching item was updated
    Applied,
    /// No hydrated item with that id; nothing changed
    Unknown,
    /// Session already torn down; nothing changed
    Discarded,
}

pub type Snapshot = Arc<Vec<ConversationListItem>>;

/// Conversation list shared between the event pump and UI readers
#[derive(Clone)]
pub struct ConversationStore {
    items: Arc<RwLock<Vec<ConversationListItem>>>,
    snapshots: Arc<watch::Sender<Snapshot>>,
    ordering: OrderingPolicy,
}

impl ConversationStore {
    pub fn new(ordering: OrderingPolicy) -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            items: Arc::new(RwLock::new(Vec::new())),
            snapshots: Arc::new(tx),
            ordering,
        }
    }

    pub fn ordering(&self) -> OrderingPolicy {
        self.ordering
    }

    /// Replace the contents with the initial load
    pub async fn hydrate(&self, loaded: Vec<ConversationListItem>) {
        let mut items = self.items.write().await;
        items.clear();
        for item in loaded {
            match items
                .iter()
                .position(|i| i.conversation_id == item.conversation_id)
            {
                Some(idx) => items[idx] = item,
                None => items.push(item),
            }
        }
        self.reorder(&mut items);
        debug!("Hydrated {} conversations", items.len());
        self.publish(&items);
    }

    /// Merge an event into the matching item
    pub async fn apply(&self, event: &ConversationUpdatedEvent) -> ApplyOutcome {
        let mut items = self.items.write().await;
        self.merge(&mut items, event)
    }

    /// `apply`, unless `guard` was revoked by the time the write lock is held
    pub async fn apply_guarded(
        &self,
        event: &ConversationUpdatedEvent,
        guard: &SessionGuard,
    ) -> ApplyOutcome {
        let mut items = self.items.write().await;
        if !guard.is_live() {
            debug!(
                "Discarding update for {} after teardown",
                event.conversation_id
            );
            return ApplyOutcome::Discarded;
        }
        self.merge(&mut items, event)
    }

    fn merge(
        &self,
        items: &mut Vec<ConversationListItem>,
        event: &ConversationUpdatedEvent,
    ) -> ApplyOutcome {
        let Some(item) = items
            .iter_mut()
            .find(|i| i.conversation_id == event.conversation_id)
        else {
            debug!(
                "Ignoring update for unknown conversation {}",
                event.conversation_id
            );
            return ApplyOutcome::Unknown;
        };

        item.last_message = Some(event.last_message.clone());
        item.unread_count = event.unread_count;
        item.updated_at = event.updated_at;

        self.reorder(items);
        self.publish(items);
        ApplyOutcome::Applied
    }

    pub async fn snapshot(&self) -> Vec<ConversationListItem> {
        self.items.read().await.clone()
    }

    pub async fn get(&self, conversation_id: &str) -> Option<ConversationListItem> {
        let items = self.items.read().await;
        items
            .iter()
            .find(|i| i.conversation_id == conversation_id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Sum of the latest unread counts
    pub async fn total_unread(&self) -> u64 {
        let items = self.items.read().await;
        items.iter().map(|i| u64::from(i.unread_count)).sum()
    }

    /// Badge text for the current total, `None` when there is nothing unread
    pub async fn badge(&self) -> Option<String> {
        unread_badge(self.total_unread().await)
    }

    /// Receiver that sees a fresh snapshot after every change
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    fn reorder(&self, items: &mut [ConversationListItem]) {
        if self.ordering == OrderingPolicy::RecentFirst {
            items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        }
    }

    fn publish(&self, items: &[ConversationListItem]) {
        self.snapshots.send_replace(Arc::new(items.to_vec()));
    }
}

/// `None` for zero, `"99+"` above the cap, the exact count otherwise
pub fn unread_badge(total: u64) -> Option<String> {
    match total {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{}+", BADGE_CAP)),
        n => Some(n.to_string()),
    }
}
