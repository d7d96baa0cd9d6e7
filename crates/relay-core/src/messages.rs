//! Chat wire types.
//!
//! - [`MessageRecord`]: the persisted message as returned by the store
//! - [`OutgoingMessage`]: what a client asks to send
//! - [`ChatEnvelope`]: cross-process unit published on the fanout channel
//! - [`ClientNotification`]: the frame finally written to a live connection
//!
//! All types serialize with camelCase field names, matching the JSON the web
//! client and the other server processes already speak.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId, UserId};

/// Event tag carried by every chat notification pushed to a client.
pub const NEW_MESSAGE_EVENT: &str = "new_message";

/// Kind of stored message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
}

/// Sender summary embedded in a stored message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    /// Sender's user ID.
    pub id: UserId,
    /// Sender's display name.
    pub name: String,
}

/// A message as persisted and identified by the external store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Store-assigned identity.
    pub id: MessageId,
    /// Message kind.
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message body.
    pub text: String,
    /// Creation timestamp assigned by the store.
    pub created_at: DateTime<Utc>,
    /// Embedded sender summary.
    pub sender: MessageSender,
}

/// A send request from an authenticated client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Target conversation.
    pub chat_id: ChatId,
    /// User the message is addressed to.
    pub receiver_id: UserId,
    /// Authenticated author.
    pub user_id: UserId,
    /// Message body.
    pub text: String,
}

impl OutgoingMessage {
    /// Build a send request.
    pub fn new(
        chat_id: impl Into<ChatId>,
        user_id: impl Into<UserId>,
        receiver_id: impl Into<UserId>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            receiver_id: receiver_id.into(),
            user_id: user_id.into(),
            text: text.into(),
        }
    }
}

/// Cross-process delivery request published on the fanout channel.
///
/// Transient: it is never stored, and a process that does not hold the
/// receiver's connection simply ignores it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    /// User who must receive the message.
    pub receiver_id: UserId,
    /// User who sent it.
    pub user_id: UserId,
    /// The persisted message.
    pub new_message: MessageRecord,
}

impl ChatEnvelope {
    /// Wrap a stored message for delivery to `receiver_id`.
    pub fn new(receiver_id: UserId, user_id: UserId, new_message: MessageRecord) -> Self {
        Self {
            receiver_id,
            user_id,
            new_message,
        }
    }

    /// Encode as the JSON string published on the bus.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a payload received from the bus.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Frame written to a client's connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientNotification {
    /// Event tag, always [`NEW_MESSAGE_EVENT`] for chat delivery.
    pub event: String,
    /// The persisted message.
    pub new_message: MessageRecord,
}

impl ClientNotification {
    /// `new_message` notification for a stored message.
    pub fn new_message(message: MessageRecord) -> Self {
        Self {
            event: NEW_MESSAGE_EVENT.to_string(),
            new_message: message,
        }
    }

    /// Serialize for writing to a connection.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ChatEnvelope> for ClientNotification {
    fn from(envelope: ChatEnvelope) -> Self {
        Self::new_message(envelope.new_message)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
