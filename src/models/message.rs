//! Message models and the tagged wire payload for peer links.

use crate::models::room::ClientId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single immutable chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Channel-assigned id, unique within a room.
    pub id: String,
    /// Display name chosen by the sender; free text, not identity-bound.
    pub author: String,
    /// Stable identifier of the sending client.
    pub sender: ClientId,
    /// Message body.
    pub body: String,
    /// Client-stamped creation time (UTC).
    pub sent_at: DateTime<Utc>,
}

/// What the view hands to a channel; the channel stamps id and timestamp.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub author: String,
    pub sender: ClientId,
    pub body: String,
}

impl MessageDraft {
    pub fn new(author: impl Into<String>, sender: ClientId, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            sender,
            body: body.into(),
        }
    }

    /// Stamp the draft into a finished message with a fresh id and the current time.
    pub fn stamp(self) -> ChatMessage {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            author: self.author,
            sender: self.sender,
            body: self.body,
            sent_at: Utc::now(),
        }
    }
}

/// In-band presence announcement carried by the mesh variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceNote {
    pub client_id: ClientId,
    pub display_name: String,
}

/// Tagged payload exchanged over a peer link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeerPayload {
    Chat(ChatMessage),
    Presence {
        /// Mesh peer id of the announcing side (room prefix included).
        peer_id: String,
        #[serde(flatten)]
        note: PresenceNote,
    },
}
