/// Shared types for the messaging layer
use crate::error::{ClientError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform role of a conversation participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Candidate,
    Recruiter,
    Admin,
    #[serde(untagged)]
    Other(String),
}

/// The other side of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: ParticipantRole,
}

/// Preview of the newest message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
}

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationListItem {
    pub conversation_id: String,
    pub other_participant: Participant,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    /// Server-authoritative, never adjusted locally
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Payload of the `conversation-updated` realtime event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUpdatedEvent {
    pub conversation_id: String,
    pub last_message: LastMessage,
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ConversationUpdatedEvent {
    /// Event name on the wire
    pub const NAME: &'static str = "conversation-updated";

    /// Validate a raw event payload
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let event: Self = serde_json::from_value(value)?;
        if event.conversation_id.trim().is_empty() {
            return Err(ClientError::Protocol(
                "conversation-updated without conversation_id".to_string(),
            ));
        }
        Ok(event)
    }
}

/// Client-side route of a conversation's detail view
pub fn conversation_route(conversation_id: &str) -> String {
    // Ids are opaque; keep `/`, `?` and `#` inside them out of the path syntax
    format!("/messages/{}", urlencoding::encode(conversation_id))
}
